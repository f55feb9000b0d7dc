use crab_protocol::SubmissionRequest;

use super::{lumi_selection, prepare_common, JobTypeContext, JobTypeError, JobTypePlugin};
use crate::config::TaskConfiguration;
use crate::mapping::ValidationError;

/// Processing of an existing dataset or of user-supplied input files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Analysis;

impl JobTypePlugin for Analysis {
    fn name(&self) -> &'static str {
        "Analysis"
    }

    fn check(&self, config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
        let has_dataset = config.get_str("Data.inputDataset").is_some();
        let has_files = config
            .get_list("Data.userInputFiles")
            .is_some_and(|files| !files.is_empty());
        if !has_dataset && !has_files {
            issues.push(ValidationError::invalid(
                "Data.inputDataset",
                "Analysis jobs need Data.inputDataset or Data.userInputFiles",
            ));
        }

        if config.get_str("Data.splitting") == Some("EventBased") {
            issues.push(ValidationError::invalid(
                "Data.splitting",
                "EventBased splitting is only allowed for PrivateMC jobs",
            ));
        }
    }

    fn prepare(
        &self,
        ctx: &JobTypeContext<'_>,
        request: &mut SubmissionRequest,
    ) -> Result<(), JobTypeError> {
        prepare_common(ctx, self.name(), request);

        if let Some(mask) = lumi_selection(ctx)? {
            let (runs, lumis) = mask.to_wire();
            request.insert("runs", runs);
            request.insert("lumis", lumis);
        }
        Ok(())
    }
}
