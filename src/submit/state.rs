//! Submission state machine
//!
//! CONFIG_LOADED → VALIDATED → CREDENTIAL_READY → SANDBOX_UPLOADED →
//! REQUEST_SENT → {ACCEPTED | REJECTED}
//!
//! Every step moves forward only. A failure stops the pipeline where it is;
//! nothing already done (a delegated credential, an uploaded sandbox) is
//! undone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Submission state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitState {
    ConfigLoaded,
    Validated,
    CredentialReady,
    SandboxUploaded,
    RequestSent,
    /// The server assigned a task name
    Accepted,
    /// The server refused the request
    Rejected,
}

impl SubmitState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: SubmitState) -> bool {
        matches!(
            (self, target),
            (SubmitState::ConfigLoaded, SubmitState::Validated)
                | (SubmitState::Validated, SubmitState::CredentialReady)
                | (SubmitState::CredentialReady, SubmitState::SandboxUploaded)
                | (SubmitState::SandboxUploaded, SubmitState::RequestSent)
                | (SubmitState::RequestSent, SubmitState::Accepted)
                | (SubmitState::RequestSent, SubmitState::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmitState::Accepted | SubmitState::Rejected)
    }
}

impl fmt::Display for SubmitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmitState::ConfigLoaded => "CONFIG_LOADED",
            SubmitState::Validated => "VALIDATED",
            SubmitState::CredentialReady => "CREDENTIAL_READY",
            SubmitState::SandboxUploaded => "SANDBOX_UPLOADED",
            SubmitState::RequestSent => "REQUEST_SENT",
            SubmitState::Accepted => "ACCEPTED",
            SubmitState::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid submission state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SubmitState,
    pub to: SubmitState,
}

/// Current state plus every state passed through.
#[derive(Debug, Clone)]
pub struct StateTracker {
    state: SubmitState,
    history: Vec<SubmitState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            state: SubmitState::ConfigLoaded,
            history: vec![SubmitState::ConfigLoaded],
        }
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SubmitState {
        self.state
    }

    pub fn history(&self) -> &[SubmitState] {
        &self.history
    }

    /// Move to `to`, refusing anything but the next step.
    pub fn advance(&mut self, to: SubmitState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = %self.state, %to, "submission state");
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}
