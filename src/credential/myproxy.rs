//! Delegation to the remote credential store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::cert::certificate_expiry;
use super::{CredentialError, CredentialManager, CredentialRecord, ToolCommand};

const INFO_TOOL: &str = "myproxy-info";
const INIT_TOOL: &str = "myproxy-init";

/// Lifetime, in hours, of proxies the server retrieves from the store.
const RETRIEVED_PROXY_HOURS: u32 = 168;

/// Outcome of a delegation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Name the credential is stored under.
    pub name: String,
    pub time_left: u64,
    /// Whether a new credential was deposited.
    pub renewed: bool,
}

/// Store name for a DN: hex SHA-256 of the DN.
pub fn credential_name(dn: &str) -> String {
    hex::encode(Sha256::digest(dn.as_bytes()))
}

/// Parse the `timeleft: H:M:S` line of `myproxy-info`.
pub fn parse_myproxy_timeleft(output: &str) -> Option<u64> {
    let value = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("timeleft:"))?
        .split_whitespace()
        .next()?;
    let mut parts = value.split(':').map(|p| p.parse::<u64>());
    let hours = parts.next()?.ok()?;
    let minutes = parts.next()?.ok()?;
    let seconds = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

impl CredentialManager<'_> {
    /// Seconds left on the stored credential; 0 when there is none.
    fn remote_time_left(&self, store_host: &str, name: &str) -> Result<u64, CredentialError> {
        let command = ToolCommand::new(INFO_TOOL)
            .args(["-s", store_host, "-l", name])
            .env("X509_USER_PROXY", self.env.proxy_path.display().to_string());
        let output = self.runner.run(&command)?;
        if !output.success() {
            debug!(stderr = %output.stderr.trim(), "no stored credential");
            return Ok(0);
        }
        Ok(parse_myproxy_timeleft(&output.stdout).unwrap_or(0))
    }

    /// Make sure the credential store holds a credential for this user with
    /// at least `renew_threshold_days` left, delegating a new one otherwise.
    pub fn delegate_to_remote_store(
        &self,
        credential: &CredentialRecord,
        store_host: &str,
        retriever_pattern: &str,
        validity_minutes: u64,
        renew_threshold_days: u32,
    ) -> Result<Delegation, CredentialError> {
        let name = credential_name(&credential.dn);
        let threshold = u64::from(renew_threshold_days) * 24 * 3600;

        let existing = self.remote_time_left(store_host, &name)?;
        if existing >= threshold {
            info!(
                days_left = existing / 86400,
                "delegated credential still valid"
            );
            return Ok(Delegation {
                name,
                time_left: existing,
                renewed: false,
            });
        }

        let expiry = certificate_expiry(self.runner, &self.env.user_cert)?;
        let cert_left = (expiry - Utc::now()).num_seconds();
        if cert_left <= 0 {
            return Err(CredentialError::CertificateExpired { expired_at: expiry });
        }
        let cert_left = cert_left as u64;

        let mut validity_seconds = validity_minutes * 60;
        if cert_left < validity_seconds {
            warn!(
                "user certificate expires in {} days; delegating only until {}",
                cert_left / 86400,
                expiry
            );
            validity_seconds = cert_left;
        }
        // Rounded down so the delegation never outlives the certificate
        let validity_hours = validity_seconds / 3600;
        if validity_hours == 0 {
            return Err(CredentialError::CertificateTooShort { expires_at: expiry });
        }

        self.env.require_user_credentials()?;
        let command = ToolCommand::new(INIT_TOOL)
            .args(["-n", "-s", store_host])
            .args(["-x", "-R", retriever_pattern])
            .args(["-x", "-Z", retriever_pattern])
            .args(["-l", name.as_str()])
            .arg("-t")
            .arg(RETRIEVED_PROXY_HOURS.to_string())
            .arg("-c")
            .arg(validity_hours.to_string())
            .arg("-C")
            .arg(self.env.user_cert.display().to_string())
            .arg("-y")
            .arg(self.env.user_key.display().to_string())
            .interactive();

        info!(hours = validity_hours, server = store_host, "delegating credential");
        self.run_checked(&command)?;

        let time_left = self.remote_time_left(store_host, &name)?;
        if time_left == 0 {
            return Err(CredentialError::DelegationEmpty {
                server: store_host.to_string(),
            });
        }
        Ok(Delegation {
            name,
            time_left,
            renewed: true,
        })
    }
}
