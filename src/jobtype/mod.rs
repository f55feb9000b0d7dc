//! Job types
//!
//! A job type adds its own checks to validation and its own metadata to the
//! submission request. Job types are looked up by name in a static table.

mod analysis;
mod private_mc;

pub use analysis::Analysis;
pub use private_mc::PrivateMc;

use std::fs;
use std::path::{Path, PathBuf};

use crab_protocol::{LumiError, LumiMask, SubmissionRequest};

use crate::config::TaskConfiguration;
use crate::environment::ClientEnvironment;
use crate::failure::{Classify, FailureKind};
use crate::mapping::ValidationError;

/// Job type errors raised while preparing a request.
#[derive(Debug, thiserror::Error)]
pub enum JobTypeError {
    #[error("unknown job type '{0}'")]
    Unknown(String),

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{param}: {source}")]
    Lumi {
        param: &'static str,
        #[source]
        source: LumiError,
    },
}

impl Classify for JobTypeError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

/// What a job type sees when preparing a request.
pub struct JobTypeContext<'a> {
    pub config: &'a TaskConfiguration,
    pub env: &'a ClientEnvironment,
    /// Relative file names in the configuration resolve against this.
    pub base_dir: &'a Path,
}

impl JobTypeContext<'_> {
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.base_dir.join(file)
    }
}

pub trait JobTypePlugin: Send + Sync {
    /// Canonical name, as sent to the server.
    fn name(&self) -> &'static str;

    /// Job-type specific validation, appended to `issues`.
    fn check(&self, config: &TaskConfiguration, issues: &mut Vec<ValidationError>);

    /// Add job-type metadata to `request`.
    fn prepare(
        &self,
        ctx: &JobTypeContext<'_>,
        request: &mut SubmissionRequest,
    ) -> Result<(), JobTypeError>;
}

type Constructor = fn() -> Box<dyn JobTypePlugin>;

fn analysis() -> Box<dyn JobTypePlugin> {
    Box::new(Analysis)
}

fn private_mc() -> Box<dyn JobTypePlugin> {
    Box::new(PrivateMc)
}

const JOB_TYPES: &[(&str, Constructor)] = &[("Analysis", analysis), ("PrivateMC", private_mc)];

/// Construct a job type by name (case-insensitive).
pub fn create(name: &str) -> Option<Box<dyn JobTypePlugin>> {
    JOB_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, constructor)| constructor())
}

/// Names of every job type.
pub fn names() -> impl Iterator<Item = &'static str> {
    JOB_TYPES.iter().map(|(name, _)| *name)
}

/// Metadata every job type sends: the executable's base name and the
/// framework release.
fn prepare_common(ctx: &JobTypeContext<'_>, plugin: &str, request: &mut SubmissionRequest) {
    request.insert("jobtype", plugin);

    if let Some(script) = ctx.config.get_str("JobType.scriptExe") {
        let base = Path::new(script)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script.to_string());
        request.insert("scriptexe", base);
    }
    if let Some(version) = &ctx.env.framework_version {
        request.insert("jobsw", version.as_str());
    }
    if let Some(arch) = &ctx.env.architecture {
        request.insert("jobarch", arch.as_str());
    }
}

/// The run and lumi selection from `Data.lumiMask` and `Data.runRange`.
fn lumi_selection(ctx: &JobTypeContext<'_>) -> Result<Option<LumiMask>, JobTypeError> {
    let run_range = ctx.config.get_str("Data.runRange");

    let mask = match ctx.config.get_str("Data.lumiMask") {
        Some(file) => {
            let path = ctx.resolve(file);
            let text = fs::read_to_string(&path).map_err(|source| JobTypeError::Read {
                path: path.clone(),
                source,
            })?;
            let mask = LumiMask::from_json_str(&text).map_err(|source| JobTypeError::Lumi {
                param: "Data.lumiMask",
                source,
            })?;
            match run_range {
                Some(range) => mask.restrict_to_runs(range),
                None => Ok(mask),
            }
        }
        None => match run_range {
            Some(range) => LumiMask::from_run_range(range),
            None => return Ok(None),
        },
    }
    .map_err(|source| JobTypeError::Lumi {
        param: "Data.runRange",
        source,
    })?;

    Ok(Some(mask))
}
