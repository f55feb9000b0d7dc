//! Payloads of the `workflow` resource.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    #[serde(rename = "RequestName")]
    pub request_name: String,
}

/// Answer to a status query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    #[serde(rename = "taskFailureMsg", default)]
    pub failure_message: Option<String>,
    #[serde(rename = "taskWarningMsg", default)]
    pub warnings: Vec<String>,
    #[serde(rename = "jobsPerStatus", default)]
    pub jobs_per_status: BTreeMap<String, u64>,
    #[serde(rename = "schedd", default)]
    pub schedd: Option<String>,
}

/// Server-side task states the client reacts to.
pub mod state {
    pub const NEW: &str = "NEW";
    pub const HOLDING: &str = "HOLDING";
    pub const QUEUED: &str = "QUEUED";
    pub const UPLOADED: &str = "UPLOADED";
    pub const SUBMITTED: &str = "SUBMITTED";
    pub const SUBMITFAILED: &str = "SUBMITFAILED";
    pub const FAILED: &str = "FAILED";
    pub const KILLED: &str = "KILLED";
    pub const KILLFAILED: &str = "KILLFAILED";
    pub const RESUBMITFAILED: &str = "RESUBMITFAILED";
}

impl TaskStatus {
    /// Still being handled by the submission machinery.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status.as_str(),
            state::NEW | state::HOLDING | state::QUEUED
        )
    }

    /// The server gave up on the task.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.as_str(),
            state::SUBMITFAILED | state::FAILED | state::KILLFAILED | state::RESUBMITFAILED
        )
    }

    /// Total number of jobs across all job states.
    pub fn total_jobs(&self) -> u64 {
        self.jobs_per_status.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_result() {
        let result: SubmitResult =
            serde_json::from_value(json!({"RequestName": "demo_unique_001"})).unwrap();
        assert_eq!(result.request_name, "demo_unique_001");
    }

    #[test]
    fn test_status_classification() {
        let status: TaskStatus = serde_json::from_value(json!({
            "status": "QUEUED",
            "jobsPerStatus": {"running": 3, "idle": 2}
        }))
        .unwrap();
        assert!(status.is_pending());
        assert!(!status.is_failed());
        assert_eq!(status.total_jobs(), 5);

        let failed = TaskStatus {
            status: "SUBMITFAILED".into(),
            failure_message: Some("no sites".into()),
            ..Default::default()
        };
        assert!(failed.is_failed());
        assert!(!failed.is_pending());
    }
}
