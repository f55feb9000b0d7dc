use std::path::{Path, PathBuf};

use crab_params::{ParamType, Section, REQUIRED_SECTIONS, SERVER_PARAMETERS};

use super::{rules, type_matches};
use crate::config::TaskConfiguration;
use crate::failure::{Classify, FailureKind};

/// One configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("section '{0}' is missing")]
    MissingSection(Section),

    #[error("parameter '{old}' has been renamed to '{new}'")]
    Renamed { old: String, new: &'static str },

    #[error("parameter '{path}' does not exist{}", suggestion_suffix(.suggestion))]
    UnknownParameter {
        path: String,
        suggestion: Option<&'static str>,
    },

    #[error("parameter '{path}' must be a {expected}, got a {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("parameter '{0}' is required")]
    MissingRequired(String),

    #[error("parameter '{path}': file '{}' does not exist", .file.display())]
    MissingFile { path: String, file: PathBuf },

    #[error("parameters '{first}' and '{second}' are mutually exclusive")]
    Conflict {
        first: &'static str,
        second: &'static str,
    },

    #[error("parameter '{path}': {message}")]
    Invalid { path: String, message: String },
}

fn suggestion_suffix(suggestion: &Option<&'static str>) -> String {
    suggestion
        .map(|s| format!("; did you mean '{}'?", s))
        .unwrap_or_default()
}

impl ValidationError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the problem concerns `path`.
    pub fn mentions(&self, path: &str) -> bool {
        match self {
            ValidationError::MissingSection(section) => {
                path.split_once('.').map_or(path, |(s, _)| s) == section.as_str()
            }
            ValidationError::Renamed { old, new } => old == path || *new == path,
            ValidationError::UnknownParameter { path: p, .. }
            | ValidationError::WrongType { path: p, .. }
            | ValidationError::MissingFile { path: p, .. }
            | ValidationError::Invalid { path: p, .. }
            | ValidationError::MissingRequired(p) => p == path,
            ValidationError::Conflict { first, second } => *first == path || *second == path,
        }
    }
}

impl Classify for ValidationError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

/// Every problem found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.issues))]
pub struct ValidationReport {
    issues: Vec<ValidationError>,
}

fn render(issues: &[ValidationError]) -> String {
    let lines: String = issues.iter().map(|issue| format!("\n  - {}", issue)).collect();
    format!("invalid task configuration ({} problem(s)){}", issues.len(), lines)
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationError] {
        &self.issues
    }

    /// Whether any problem concerns `path`.
    pub fn mentions(&self, path: &str) -> bool {
        self.issues.iter().any(|i| i.mentions(path))
    }

    pub fn into_result(self) -> Result<(), ValidationReport> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Classify for ValidationReport {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

fn expected_name(kind: ParamType) -> &'static str {
    match kind {
        ParamType::List => "list of strings",
        other => other.as_str(),
    }
}

/// Validate `config`. Relative file names resolve against `base_dir`.
pub fn validate(config: &TaskConfiguration, base_dir: &Path) -> ValidationReport {
    let mut issues = Vec::new();

    for section in REQUIRED_SECTIONS {
        if !config.has_section(*section) {
            issues.push(ValidationError::MissingSection(*section));
        }
    }

    for (path, value) in config.entries() {
        if let Some(new) = crab_params::renamed_to(&path) {
            issues.push(ValidationError::Renamed { old: path, new });
            continue;
        }
        let Some(info) = crab_params::lookup(&path) else {
            let suggestion = crab_params::suggest(&path);
            issues.push(ValidationError::UnknownParameter { path, suggestion });
            continue;
        };
        if !type_matches(info.kind, value) {
            issues.push(ValidationError::WrongType {
                path,
                expected: expected_name(info.kind),
                found: value.type_name(),
            });
        }
    }

    for param in SERVER_PARAMETERS.iter().filter(|p| p.required) {
        let present = param.config.iter().any(|path| config.contains(path));
        if !present && param.default.is_none() {
            if let Some(first) = param.config.first() {
                issues.push(ValidationError::MissingRequired(first.to_string()));
            }
        }
    }

    rules::check(config, base_dir, &mut issues);

    ValidationReport { issues }
}
