use crab_protocol::SubmissionRequest;

use super::{prepare_common, JobTypeContext, JobTypeError, JobTypePlugin};
use crate::config::TaskConfiguration;
use crate::mapping::ValidationError;

/// Primary dataset name used when the user gives none.
const DEFAULT_PRIMARY_DATASET: &str = "CRAB_PrivateMC";

/// Event generation without an input dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivateMc;

impl JobTypePlugin for PrivateMc {
    fn name(&self) -> &'static str {
        "PrivateMC"
    }

    fn check(&self, config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
        match config.get_str("Data.splitting") {
            Some("EventBased") | None => {}
            Some(other) => issues.push(ValidationError::invalid(
                "Data.splitting",
                format!("PrivateMC jobs need EventBased splitting, not {}", other),
            )),
        }

        match config.get_int("Data.totalUnits") {
            Some(units) if units > 0 => {}
            _ => issues.push(ValidationError::invalid(
                "Data.totalUnits",
                "PrivateMC jobs need a positive number of events",
            )),
        }

        if config.contains("Data.inputDataset") {
            issues.push(ValidationError::invalid(
                "Data.inputDataset",
                "PrivateMC jobs do not read an input dataset",
            ));
        }
    }

    fn prepare(
        &self,
        ctx: &JobTypeContext<'_>,
        request: &mut SubmissionRequest,
    ) -> Result<(), JobTypeError> {
        prepare_common(ctx, self.name(), request);
        if !request.contains_key("primarydataset") {
            request.insert("primarydataset", DEFAULT_PRIMARY_DATASET);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ClientEnvironment;
    use std::path::{Path, PathBuf};

    fn demo() -> TaskConfiguration {
        let mut config = TaskConfiguration::new();
        config.set("Data.splitting", "EventBased").unwrap();
        config.set("Data.unitsPerJob", 10).unwrap();
        config.set("Data.totalUnits", 100).unwrap();
        config
    }

    #[test]
    fn test_demo_passes() {
        let mut issues = Vec::new();
        PrivateMc.check(&demo(), &mut issues);
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_needs_event_based_and_units() {
        let mut config = demo();
        config.set("Data.splitting", "FileBased").unwrap();
        config.set("Data.totalUnits", 0).unwrap();
        let mut issues = Vec::new();
        PrivateMc.check(&config, &mut issues);
        let text: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert_eq!(text.len(), 2);
        assert!(text[0].contains("Data.splitting"));
        assert!(text[1].contains("Data.totalUnits"));
    }

    #[test]
    fn test_prepare_defaults_primary_dataset() {
        let config = demo();
        let env = ClientEnvironment {
            user_cert: PathBuf::new(),
            user_key: PathBuf::new(),
            proxy_path: PathBuf::new(),
            cert_dir: PathBuf::new(),
            framework_base: None,
            framework_version: None,
            architecture: None,
        };
        let ctx = JobTypeContext {
            config: &config,
            env: &env,
            base_dir: Path::new("."),
        };

        let mut request = SubmissionRequest::new();
        PrivateMc.prepare(&ctx, &mut request).unwrap();
        assert_eq!(request.get_str("primarydataset"), Some(DEFAULT_PRIMARY_DATASET));
        assert!(!request.contains_key("jobsw"));

        let mut request = SubmissionRequest::new().with("primarydataset", "MyGen");
        PrivateMc.prepare(&ctx, &mut request).unwrap();
        assert_eq!(request.get_str("primarydataset"), Some("MyGen"));
    }
}
