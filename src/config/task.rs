//! The sectioned task configuration.
//!
//! A task configuration is a set of declared sections, each holding
//! attribute → value pairs. Attribute names are not checked here; the
//! validator does that against the parameter registry so that every
//! problem is reported together.

use crab_params::Section;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::failure::{Classify, FailureKind};

/// Default task configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "crabConfig.toml";

/// Task configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TaskConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(String),

    #[error("unknown section '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownSection {
        name: String,
        suggestion: Option<&'static str>,
    },

    #[error("top-level key '{0}' is not a section table")]
    NotASection(String),

    #[error("'{0}' is not of the form Section.Attribute")]
    BadPath(String),

    #[error("override '{0}' is not of the form Section.Attribute=value")]
    BadOverride(String),

    #[error("cannot render configuration: {0}")]
    Render(String),
}

impl Classify for TaskConfigError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

fn suggestion_suffix(suggestion: &Option<&'static str>) -> String {
    suggestion
        .map(|s| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
    Dict(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Str(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Dict(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// List elements, when every element is a string.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            ConfigValue::List(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    fn from_toml(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::Str(s),
            toml::Value::Integer(i) => ConfigValue::Int(i),
            toml::Value::Float(f) => ConfigValue::Float(f),
            toml::Value::Boolean(b) => ConfigValue::Bool(b),
            toml::Value::Datetime(dt) => ConfigValue::Str(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(Self::from_toml).collect())
            }
            toml::Value::Table(table) => ConfigValue::Dict(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_toml(v)))
                    .collect(),
            ),
        }
    }

    fn to_toml(&self) -> toml::Value {
        match self {
            ConfigValue::Str(s) => toml::Value::String(s.clone()),
            ConfigValue::Int(i) => toml::Value::Integer(*i),
            ConfigValue::Float(f) => toml::Value::Float(*f),
            ConfigValue::Bool(b) => toml::Value::Boolean(*b),
            ConfigValue::List(items) => {
                toml::Value::Array(items.iter().map(Self::to_toml).collect())
            }
            ConfigValue::Dict(d) => toml::Value::Table(
                d.iter().map(|(k, v)| (k.clone(), v.to_toml())).collect(),
            ),
        }
    }

    /// Parse a command-line override value: a TOML literal, or the raw
    /// text as a string when it is not one.
    pub fn parse_literal(raw: &str) -> Self {
        let wrapped = format!("v = {}", raw);
        match wrapped.parse::<toml::Table>() {
            Ok(mut table) => match table.remove("v") {
                Some(value) => Self::from_toml(value),
                None => ConfigValue::Str(raw.to_string()),
            },
            Err(_) => ConfigValue::Str(raw.to_string()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Str(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.to_toml()),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Str(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::Str(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Int(i)
    }
}

impl From<i32> for ConfigValue {
    fn from(i: i32) -> Self {
        ConfigValue::Int(i64::from(i))
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<Vec<&str>> for ConfigValue {
    fn from(items: Vec<&str>) -> Self {
        ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
    }
}

/// The user's task configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskConfiguration {
    declared: BTreeSet<Section>,
    values: BTreeMap<Section, BTreeMap<String, ConfigValue>>,
}

impl TaskConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML task configuration file.
    pub fn load(path: &Path) -> Result<Self, TaskConfigError> {
        let text = fs::read_to_string(path).map_err(|source| TaskConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text with one table per section.
    pub fn from_toml_str(text: &str) -> Result<Self, TaskConfigError> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| TaskConfigError::Parse(e.to_string()))?;

        let mut config = Self::new();
        for (name, value) in table {
            let section = parse_section(&name)?;
            let toml::Value::Table(attrs) = value else {
                return Err(TaskConfigError::NotASection(name));
            };
            config.declare(section);
            for (attr, value) in attrs {
                config.insert(section, attr, ConfigValue::from_toml(value));
            }
        }
        Ok(config)
    }

    /// Declare a section, possibly empty.
    pub fn declare(&mut self, section: Section) {
        self.declared.insert(section);
    }

    pub fn has_section(&self, section: Section) -> bool {
        self.declared.contains(&section)
    }

    pub fn declared_sections(&self) -> impl Iterator<Item = Section> + '_ {
        self.declared.iter().copied()
    }

    fn insert(&mut self, section: Section, attr: String, value: ConfigValue) {
        self.declare(section);
        self.values.entry(section).or_default().insert(attr, value);
    }

    /// Set `Section.Attribute`, declaring the section.
    pub fn set(&mut self, path: &str, value: impl Into<ConfigValue>) -> Result<(), TaskConfigError> {
        let (section, attr) = split(path)?;
        self.insert(section, attr.to_string(), value.into());
        Ok(())
    }

    /// Remove `Section.Attribute`, returning the old value.
    pub fn unset(&mut self, path: &str) -> Option<ConfigValue> {
        let (section, attr) = split(path).ok()?;
        self.values.get_mut(&section)?.remove(attr)
    }

    /// Apply a `Section.Attribute=value` override.
    pub fn apply_override(&mut self, spec: &str) -> Result<(), TaskConfigError> {
        let (path, raw) = spec
            .split_once('=')
            .ok_or_else(|| TaskConfigError::BadOverride(spec.to_string()))?;
        let path = path.trim();
        split(path).map_err(|_| TaskConfigError::BadOverride(spec.to_string()))?;
        self.set(path, ConfigValue::parse_literal(raw.trim()))
    }

    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        let (section, attr) = split(path).ok()?;
        self.values.get(&section)?.get(attr)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(ConfigValue::as_str)
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(ConfigValue::as_int)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(ConfigValue::as_bool)
    }

    pub fn get_list(&self, path: &str) -> Option<Vec<String>> {
        self.get(path).and_then(ConfigValue::as_string_list)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Every attribute set, as `(Section.Attribute, value)` in section order.
    pub fn entries(&self) -> impl Iterator<Item = (String, &ConfigValue)> + '_ {
        self.values.iter().flat_map(|(section, attrs)| {
            attrs
                .iter()
                .map(move |(attr, value)| (format!("{}.{}", section, attr), value))
        })
    }

    /// Render back to TOML.
    pub fn to_toml_string(&self) -> Result<String, TaskConfigError> {
        let mut root = toml::Table::new();
        for section in &self.declared {
            let attrs: toml::Table = self
                .values
                .get(section)
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_toml()))
                        .collect()
                })
                .unwrap_or_default();
            root.insert(section.to_string(), toml::Value::Table(attrs));
        }
        toml::to_string(&root).map_err(|e| TaskConfigError::Render(e.to_string()))
    }
}

fn parse_section(name: &str) -> Result<Section, TaskConfigError> {
    name.parse::<Section>().map_err(|_| TaskConfigError::UnknownSection {
        name: name.to_string(),
        suggestion: Section::ALL
            .iter()
            .map(Section::as_str)
            .find(|candidate| {
                candidate.eq_ignore_ascii_case(name)
                    || strsim::damerau_levenshtein(candidate, name) <= 2
            }),
    })
}

fn split(path: &str) -> Result<(Section, &str), TaskConfigError> {
    let (section, attr) =
        crab_params::split_path(path).ok_or_else(|| TaskConfigError::BadPath(path.to_string()))?;
    Ok((parse_section(section)?, attr))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[General]
requestName = "demo"
transferLogs = false

[JobType]
pluginName = "PrivateMC"
inputFiles = ["a.txt", "b/*.dat"]

[Data]
unitsPerJob = 10

[Site]
"#;

    #[test]
    fn test_parse_sections() {
        let config = TaskConfiguration::from_toml_str(SAMPLE).unwrap();
        assert!(config.has_section(Section::Site));
        assert!(!config.has_section(Section::User));
        assert_eq!(config.get_str("General.requestName"), Some("demo"));
        assert_eq!(config.get_bool("General.transferLogs"), Some(false));
        assert_eq!(config.get_int("Data.unitsPerJob"), Some(10));
        assert_eq!(
            config.get_list("JobType.inputFiles"),
            Some(vec!["a.txt".to_string(), "b/*.dat".to_string()])
        );
    }

    #[test]
    fn test_unknown_section_suggests() {
        let err = TaskConfiguration::from_toml_str("[Generl]\nfoo = 1\n").unwrap_err();
        assert!(err.to_string().contains("did you mean 'General'"), "{}", err);
    }

    #[test]
    fn test_top_level_scalar_rejected() {
        let err = TaskConfiguration::from_toml_str("General = 3\n").unwrap_err();
        assert!(matches!(err, TaskConfigError::NotASection(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = TaskConfiguration::from_toml_str(SAMPLE).unwrap();
        config.apply_override("Data.unitsPerJob=20").unwrap();
        config.apply_override("Site.storageSite=T2_CH_CERN").unwrap();
        config.apply_override("Site.whitelist=[\"T2_A\", \"T2_B\"]").unwrap();
        config.apply_override("General.transferLogs=true").unwrap();

        assert_eq!(config.get_int("Data.unitsPerJob"), Some(20));
        assert_eq!(config.get_str("Site.storageSite"), Some("T2_CH_CERN"));
        assert_eq!(config.get_list("Site.whitelist").unwrap().len(), 2);
        assert_eq!(config.get_bool("General.transferLogs"), Some(true));

        assert!(config.apply_override("noequals").is_err());
        assert!(config.apply_override("Bogus.x=1").is_err());
    }

    #[test]
    fn test_toml_render_reparses() {
        let config = TaskConfiguration::from_toml_str(SAMPLE).unwrap();
        let rendered = config.to_toml_string().unwrap();
        let again = TaskConfiguration::from_toml_str(&rendered).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(ConfigValue::parse_literal("3").type_name(), "integer");
        assert_eq!(ConfigValue::parse_literal("3.5").type_name(), "float");
        assert_eq!(ConfigValue::parse_literal("T2_X").type_name(), "string");
        assert_eq!(ConfigValue::parse_literal("{a = 1}").type_name(), "dict");
    }
}
