//! User certificate lifetime.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;

use super::{CommandRunner, CredentialError, ToolCommand};

const OPENSSL: &str = "openssl";

/// Parse `notAfter=Jun  1 12:00:00 2027 GMT`.
pub fn parse_enddate(output: &str) -> Option<DateTime<Utc>> {
    let line = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("notAfter="))?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&collapsed, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Expiry of the certificate at `cert`.
pub fn certificate_expiry(
    runner: &dyn CommandRunner,
    cert: &Path,
) -> Result<DateTime<Utc>, CredentialError> {
    let command = ToolCommand::new(OPENSSL)
        .args(["x509", "-noout", "-enddate", "-in"])
        .arg(cert.display().to_string());
    let output = runner.run(&command)?;
    if !output.success() {
        return Err(CredentialError::ToolFailed {
            program: OPENSSL.into(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    parse_enddate(&output.stdout).ok_or_else(|| CredentialError::UnexpectedOutput {
        program: OPENSSL.into(),
        output: output.stdout.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_enddate() {
        let when = parse_enddate("notAfter=Jun  1 12:30:05 2027 GMT\n").unwrap();
        assert_eq!((when.year(), when.month(), when.day()), (2027, 6, 1));
        assert_eq!((when.hour(), when.minute(), when.second()), (12, 30, 5));

        let when = parse_enddate("notAfter=Dec 24 00:00:00 2030 GMT").unwrap();
        assert_eq!(when.day(), 24);
    }

    #[test]
    fn test_parse_enddate_garbage() {
        assert!(parse_enddate("unable to load certificate").is_none());
        assert!(parse_enddate("notAfter=sometime").is_none());
    }
}
