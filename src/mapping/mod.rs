//! Configuration Mapper / Validator
//!
//! Checks a task configuration against the parameter registry in
//! `crab-params` and translates it into the flat submission request.
//!
//! Validation collects every problem before reporting and never touches
//! the network, the credential tools or the configuration itself.

mod rules;
mod translate;
mod validate;

pub use translate::{annotate_server_headers, annotate_server_message, to_wire_value, translate};
pub use validate::{validate, ValidationError, ValidationReport};

use crab_params::ParamType;

use crate::config::ConfigValue;

/// Whether `value` has the shape a parameter of type `kind` accepts.
pub fn type_matches(kind: ParamType, value: &ConfigValue) -> bool {
    match kind {
        ParamType::String => matches!(value, ConfigValue::Str(_)),
        ParamType::Int => matches!(value, ConfigValue::Int(_)),
        ParamType::Bool => matches!(value, ConfigValue::Bool(_)),
        ParamType::List => value.as_string_list().is_some(),
        ParamType::Dict => matches!(value, ConfigValue::Dict(_)),
    }
}
