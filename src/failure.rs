//! Failure taxonomy and stable exit codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure kind - categorizes the cause of a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Bad, missing or unknown parameter; caught before any network I/O
    Configuration,
    /// External credential tool failed or left an inconsistent state
    ProxyCreation,
    /// Missing certificate material or CA path
    Environment,
    /// Non-200 response after retries were exhausted
    RestCommunication,
    /// An input file pattern matched nothing
    InputFileNotFound,
    /// The sandbox exceeds the cache's size limit
    SandboxTooBig,
    /// The server accepted the request but reported a logical failure
    CommandFailed,
    /// Anything not classified above
    Unexpected,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Configuration => ExitCode::Configuration,
            FailureKind::ProxyCreation => ExitCode::ProxyCreation,
            FailureKind::Environment => ExitCode::Environment,
            FailureKind::RestCommunication => ExitCode::RestCommunication,
            FailureKind::InputFileNotFound => ExitCode::InputFileNotFound,
            FailureKind::SandboxTooBig => ExitCode::SandboxTooBig,
            FailureKind::CommandFailed => ExitCode::CommandFailed,
            FailureKind::Unexpected => ExitCode::Unexpected,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "Configuration error",
            FailureKind::ProxyCreation => "Proxy creation failed",
            FailureKind::Environment => "Environment error",
            FailureKind::RestCommunication => "Server communication failed",
            FailureKind::InputFileNotFound => "Input file not found",
            FailureKind::SandboxTooBig => "Sandbox too big",
            FailureKind::CommandFailed => "Command failed",
            FailureKind::Unexpected => "Unexpected error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Stable exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful execution (also used after a user interrupt)
    #[default]
    Success = 0,
    /// Unclassified failure
    Unexpected = 1,
    Configuration = 10,
    ProxyCreation = 20,
    Environment = 21,
    RestCommunication = 30,
    InputFileNotFound = 40,
    SandboxTooBig = 41,
    CommandFailed = 50,
}

impl ExitCode {
    /// Get the integer value of the exit code
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Implemented by every error that can end a command.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;

    fn exit_code(&self) -> ExitCode {
        self.failure_kind().exit_code()
    }
}
