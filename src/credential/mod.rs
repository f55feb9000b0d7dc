//! Credential Manager
//!
//! Produces a valid local grid proxy and delegates a renewable credential
//! to the remote credential store. The real work is done by the external
//! `voms-proxy-*`, `myproxy-*` and `openssl` tools; this module decides
//! when to call them and interprets their output.
//!
//! Local proxy states:
//!
//! ```text
//! Absent ─┐
//! Expired ├──create()──► ValidOk
//! ValidWrongAttrs ─(policy)─┘
//! ```

mod cert;
mod myproxy;
mod proxy;
mod runner;

pub use cert::{certificate_expiry, parse_enddate};
pub use myproxy::{credential_name, parse_myproxy_timeleft, Delegation};
pub use proxy::{classify, parse_fqan, strip_proxy_cns};
pub use runner::{CommandRunner, SystemRunner, ToolCommand, ToolOutput};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::environment::{ClientEnvironment, EnvironmentError};
use crate::failure::{Classify, FailureKind};

/// Virtual organization every proxy is issued for.
pub const VO: &str = "cms";

/// Requests are never made with less proxy lifetime than this.
pub const DEFAULT_MIN_TIME_LEFT_SECONDS: u64 = 720;

/// Credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("cannot run {program}: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed with exit code {code}: {stderr}")]
    ToolFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected output from {program}: {output}")]
    UnexpectedOutput { program: String, output: String },

    #[error(
        "proxy {path} carries group '{found_group}' role '{found_role}' but group '{group}' role '{role}' was requested"
    )]
    AttributeMismatch {
        path: PathBuf,
        group: String,
        role: String,
        found_group: String,
        found_role: String,
    },

    #[error("new proxy has {time_left}s left, below the {threshold}s minimum")]
    ProxyTooShort { time_left: u64, threshold: u64 },

    #[error("user certificate expired at {expired_at}")]
    CertificateExpired { expired_at: DateTime<Utc> },

    #[error("user certificate expires at {expires_at}, less than an hour from now; renew it before delegating")]
    CertificateTooShort { expires_at: DateTime<Utc> },

    #[error("delegation to {server} left no valid credential (pass phrase rejected?)")]
    DelegationEmpty { server: String },
}

impl Classify for CredentialError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            CredentialError::Environment(_) | CredentialError::ToolUnavailable { .. } => {
                FailureKind::Environment
            }
            _ => FailureKind::ProxyCreation,
        }
    }
}

/// What to do when a valid proxy carries other VO attributes than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Replace the proxy
    Overwrite,
    /// Use the existing proxy as is
    Keep,
    /// Stop with an error
    #[default]
    Fail,
}

impl FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" | "yes" => Ok(MismatchPolicy::Overwrite),
            "keep" | "no" => Ok(MismatchPolicy::Keep),
            "fail" => Ok(MismatchPolicy::Fail),
            other => Err(format!(
                "unknown mismatch policy '{}' (expected overwrite, keep or fail)",
                other
            )),
        }
    }
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MismatchPolicy::Overwrite => "overwrite",
            MismatchPolicy::Keep => "keep",
            MismatchPolicy::Fail => "fail",
        })
    }
}

/// State of the local proxy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalProxyState {
    Absent,
    /// Time left below the threshold
    Expired,
    ValidWrongAttrs,
    ValidOk,
}

/// The local proxy as last inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub path: PathBuf,
    /// Owning user's DN, proxy CNs removed.
    pub dn: String,
    pub group: String,
    pub role: String,
    pub time_left: u64,
}

/// Drives the external credential tools.
pub struct CredentialManager<'a> {
    runner: &'a dyn CommandRunner,
    env: &'a ClientEnvironment,
    proxy_validity_hours: u32,
}

impl<'a> CredentialManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, env: &'a ClientEnvironment) -> Self {
        Self {
            runner,
            env,
            proxy_validity_hours: 172,
        }
    }

    pub fn with_proxy_validity_hours(mut self, hours: u32) -> Self {
        self.proxy_validity_hours = hours;
        self
    }

    pub fn environment(&self) -> &ClientEnvironment {
        self.env
    }

    /// Run a tool and fail unless it exits 0.
    fn run_checked(&self, command: &ToolCommand) -> Result<ToolOutput, CredentialError> {
        let output = self.runner.run(command)?;
        if !output.success() {
            return Err(CredentialError::ToolFailed {
                program: command.program.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}
