//! Deny-by-default parameter registry for CRAB task configurations.
//!
//! Every `Section.Attribute` a user may set is listed here, either as a
//! server parameter (translated into the submission request) or as a
//! client-only parameter (consumed locally). Anything not listed is
//! rejected by the validator.

mod alias;
mod suggest;
mod table;

pub use alias::{alias_for_url, has_aliases, known_aliases, resolve_alias};
pub use suggest::suggest;
pub use table::{CLIENT_PARAMETERS, RENAMED_PARAMETERS, SERVER_PARAMETERS};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Configuration sections, in the order they are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    General,
    JobType,
    Data,
    Site,
    User,
    Debug,
}

/// Sections every task configuration must declare.
pub const REQUIRED_SECTIONS: &[Section] =
    &[Section::General, Section::JobType, Section::Data, Section::Site];

impl Section {
    /// All sections.
    pub const ALL: [Section; 6] = [
        Section::General,
        Section::JobType,
        Section::Data,
        Section::Site,
        Section::User,
        Section::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::General => "General",
            Section::JobType => "JobType",
            Section::Data => "Data",
            Section::Site => "Site",
            Section::User => "User",
            Section::Debug => "Debug",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .iter()
            .copied()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Value type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Bool,
    List,
    Dict,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "integer",
            ParamType::Bool => "boolean",
            ParamType::List => "list",
            ParamType::Dict => "dict",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default applied when no configured path supplies a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    Str(&'static str),
    Int(i64),
    Bool(bool),
    EmptyList,
}

/// A parameter the server understands, with the config paths feeding it.
#[derive(Debug, Clone, Copy)]
pub struct ServerParameter {
    /// Name on the wire.
    pub server_name: &'static str,
    /// Used when no config path is set.
    pub default: Option<ParamDefault>,
    /// `Section.Attribute` paths, first match wins.
    pub config: &'static [&'static str],
    pub kind: ParamType,
    pub required: bool,
}

/// A parameter consumed by the client only.
#[derive(Debug, Clone, Copy)]
pub struct ClientParameter {
    pub path: &'static str,
    pub kind: ParamType,
}

/// A parameter that was renamed in an earlier release.
#[derive(Debug, Clone, Copy)]
pub struct RenamedParameter {
    pub old: &'static str,
    pub new: &'static str,
}

/// What the registry knows about a config path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    pub path: &'static str,
    pub kind: ParamType,
    /// `None` for client-only parameters.
    pub server_name: Option<&'static str>,
}

/// Look up a `Section.Attribute` path.
pub fn lookup(path: &str) -> Option<ParamInfo> {
    for param in SERVER_PARAMETERS {
        if let Some(found) = param.config.iter().find(|p| **p == path) {
            return Some(ParamInfo {
                path: found,
                kind: param.kind,
                server_name: Some(param.server_name),
            });
        }
    }
    CLIENT_PARAMETERS
        .iter()
        .find(|p| p.path == path)
        .map(|p| ParamInfo {
            path: p.path,
            kind: p.kind,
            server_name: None,
        })
}

/// Whether `path` may be set by a user.
pub fn is_known(path: &str) -> bool {
    lookup(path).is_some()
}

/// The new name for a renamed parameter.
pub fn renamed_to(old: &str) -> Option<&'static str> {
    RENAMED_PARAMETERS
        .iter()
        .find(|r| r.old == old)
        .map(|r| r.new)
}

/// Server parameter by wire name.
pub fn server_parameter(server_name: &str) -> Option<&'static ServerParameter> {
    SERVER_PARAMETERS
        .iter()
        .find(|p| p.server_name == server_name)
}

/// Config paths that feed a server parameter (empty when unknown).
pub fn config_names_for(server_name: &str) -> &'static [&'static str] {
    server_parameter(server_name)
        .map(|p| p.config)
        .unwrap_or(&[])
}

/// Every path a user may set.
pub fn all_config_paths() -> impl Iterator<Item = &'static str> {
    SERVER_PARAMETERS
        .iter()
        .flat_map(|p| p.config.iter().copied())
        .chain(CLIENT_PARAMETERS.iter().map(|p| p.path))
}

/// Split `Section.Attribute` into its parts.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let (section, attr) = path.split_once('.')?;
    if section.is_empty() || attr.is_empty() || attr.contains('.') {
        return None;
    }
    Some((section, attr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_server_parameter() {
        let info = lookup("Data.splitting").unwrap();
        assert_eq!(info.server_name, Some("splitalgo"));
        assert_eq!(info.kind, ParamType::String);
    }

    #[test]
    fn test_lookup_client_parameter() {
        let info = lookup("General.workArea").unwrap();
        assert_eq!(info.server_name, None);
    }

    #[test]
    fn test_unknown_path() {
        assert!(lookup("Data.splittng").is_none());
        assert!(!is_known("Nope.nothing"));
    }

    #[test]
    fn test_config_paths_unique() {
        let mut seen = HashSet::new();
        for path in all_config_paths() {
            assert!(seen.insert(path), "duplicate config path {}", path);
            let (section, _) = split_path(path).unwrap();
            assert!(section.parse::<Section>().is_ok(), "bad section in {}", path);
        }
    }

    #[test]
    fn test_server_names_unique() {
        let mut seen = HashSet::new();
        for param in SERVER_PARAMETERS {
            assert!(seen.insert(param.server_name));
        }
    }

    #[test]
    fn test_renamed_parameters_point_to_known_names() {
        for renamed in RENAMED_PARAMETERS {
            assert!(is_known(renamed.new), "{} -> {}", renamed.old, renamed.new);
            assert!(!is_known(renamed.old), "{} still registered", renamed.old);
        }
    }

    #[test]
    fn test_config_names_for() {
        assert_eq!(config_names_for("asyncdest"), &["Site.storageSite"]);
        assert!(config_names_for("nosuchparam").is_empty());
    }

    #[test]
    fn test_section_parse() {
        assert_eq!("JobType".parse::<Section>(), Ok(Section::JobType));
        assert!("jobtype".parse::<Section>().is_err());
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("Data.splitting"), Some(("Data", "splitting")));
        assert_eq!(split_path("Data"), None);
        assert_eq!(split_path("Data.a.b"), None);
    }
}
