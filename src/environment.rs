//! Grid environment discovery.

use std::env;
use std::path::{Path, PathBuf};

use crate::failure::{Classify, FailureKind};

pub const DEFAULT_CERT_DIR: &str = "/etc/grid-security/certificates";

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("CA certificate directory {0} does not exist; set X509_CERT_DIR")]
    MissingCertDir(PathBuf),

    #[error("cannot determine the home directory for the default certificate location")]
    NoHome,

    #[error("{what} not found at {path}")]
    MissingFile { what: &'static str, path: PathBuf },
}

impl Classify for EnvironmentError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Environment
    }
}

/// Certificate, proxy and CA locations, plus framework metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEnvironment {
    pub user_cert: PathBuf,
    pub user_key: PathBuf,
    pub proxy_path: PathBuf,
    pub cert_dir: PathBuf,
    /// `$CMSSW_BASE`
    pub framework_base: Option<PathBuf>,
    /// `$CMSSW_VERSION`
    pub framework_version: Option<String>,
    /// `$SCRAM_ARCH`
    pub architecture: Option<String>,
}

impl ClientEnvironment {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, EnvironmentError> {
        Self::from_lookup(|name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnvironmentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let globus = || -> Result<PathBuf, EnvironmentError> {
            dirs::home_dir()
                .map(|home| home.join(".globus"))
                .ok_or(EnvironmentError::NoHome)
        };

        let user_cert = match lookup("X509_USER_CERT") {
            Some(path) => PathBuf::from(path),
            None => globus()?.join("usercert.pem"),
        };
        let user_key = match lookup("X509_USER_KEY") {
            Some(path) => PathBuf::from(path),
            None => globus()?.join("userkey.pem"),
        };
        let proxy_path = lookup("X509_USER_PROXY")
            .map(PathBuf::from)
            .unwrap_or_else(default_proxy_path);

        let cert_dir = match lookup("X509_CERT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let dir = PathBuf::from(DEFAULT_CERT_DIR);
                if !dir.is_dir() {
                    return Err(EnvironmentError::MissingCertDir(dir));
                }
                dir
            }
        };

        Ok(Self {
            user_cert,
            user_key,
            proxy_path,
            cert_dir,
            framework_base: lookup("CMSSW_BASE").map(PathBuf::from),
            framework_version: lookup("CMSSW_VERSION"),
            architecture: lookup("SCRAM_ARCH"),
        })
    }

    /// Fail unless the user certificate and key exist.
    pub fn require_user_credentials(&self) -> Result<(), EnvironmentError> {
        require_file("user certificate", &self.user_cert)?;
        require_file("user key", &self.user_key)
    }
}

fn require_file(what: &'static str, path: &Path) -> Result<(), EnvironmentError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EnvironmentError::MissingFile {
            what,
            path: path.to_path_buf(),
        })
    }
}

/// `/tmp/x509up_u<uid>`
pub fn default_proxy_path() -> PathBuf {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/x509up_u{}", uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_explicit_locations() {
        let dir = TempDir::new().unwrap();
        let vars = HashMap::from([
            ("X509_USER_CERT", "/c/cert.pem".to_string()),
            ("X509_USER_KEY", "/c/key.pem".to_string()),
            ("X509_USER_PROXY", "/c/proxy".to_string()),
            ("X509_CERT_DIR", dir.path().display().to_string()),
            ("CMSSW_VERSION", "CMSSW_13_0_0".to_string()),
        ]);
        let env = ClientEnvironment::from_lookup(lookup_from(vars)).unwrap();
        assert_eq!(env.user_cert, PathBuf::from("/c/cert.pem"));
        assert_eq!(env.proxy_path, PathBuf::from("/c/proxy"));
        assert_eq!(env.framework_version.as_deref(), Some("CMSSW_13_0_0"));
        assert!(env.framework_base.is_none());
    }

    #[test]
    fn test_default_proxy_path_has_uid() {
        let path = default_proxy_path();
        assert!(path.to_string_lossy().starts_with("/tmp/x509up_u"));
    }

    #[test]
    fn test_missing_credentials_reported() {
        let dir = TempDir::new().unwrap();
        let vars = HashMap::from([
            ("X509_USER_CERT", dir.path().join("nope.pem").display().to_string()),
            ("X509_USER_KEY", dir.path().join("nokey.pem").display().to_string()),
            ("X509_CERT_DIR", dir.path().display().to_string()),
        ]);
        let env = ClientEnvironment::from_lookup(lookup_from(vars)).unwrap();
        let err = env.require_user_credentials().unwrap_err();
        assert!(matches!(err, EnvironmentError::MissingFile { what: "user certificate", .. }));
        assert_eq!(err.failure_kind(), FailureKind::Environment);
    }
}
