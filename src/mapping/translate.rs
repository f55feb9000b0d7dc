//! Outbound translation and inbound error annotation.

use crab_params::{ParamDefault, SERVER_PARAMETERS};
use crab_protocol::{ServerErrorHeaders, SubmissionRequest, WireValue};

use crate::config::{ConfigValue, TaskConfiguration};

/// Wire form of a configuration value. Booleans become 0/1 and dicts are
/// sent as JSON text.
pub fn to_wire_value(value: &ConfigValue) -> WireValue {
    match value {
        ConfigValue::Bool(b) => WireValue::from(*b),
        ConfigValue::Int(i) => WireValue::Int(*i),
        ConfigValue::Float(f) => WireValue::Str(f.to_string()),
        ConfigValue::Str(s) => WireValue::Str(s.clone()),
        ConfigValue::List(items) => WireValue::List(
            items
                .iter()
                .map(|item| match item {
                    ConfigValue::Str(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        ConfigValue::Dict(_) => {
            WireValue::Str(serde_json::to_string(value).unwrap_or_default())
        }
    }
}

fn default_value(default: ParamDefault) -> WireValue {
    match default {
        ParamDefault::Str(s) => WireValue::from(s),
        ParamDefault::Int(i) => WireValue::Int(i),
        ParamDefault::Bool(b) => WireValue::from(b),
        ParamDefault::EmptyList => WireValue::List(Vec::new()),
    }
}

/// Translate a validated configuration into the server request.
///
/// For each registry entry the first configured path wins, then the
/// default; parameters with neither are omitted. Aliased parameters have
/// short names replaced by their canonical URL.
pub fn translate(config: &TaskConfiguration) -> SubmissionRequest {
    let mut request = SubmissionRequest::new();

    for param in SERVER_PARAMETERS {
        let value = param
            .config
            .iter()
            .find_map(|path| config.get(path))
            .map(to_wire_value)
            .or_else(|| param.default.map(default_value));

        let Some(value) = value else {
            continue;
        };
        let value = match value {
            WireValue::Str(s) if crab_params::has_aliases(param.server_name) => {
                WireValue::from(crab_params::resolve_alias(param.server_name, &s))
            }
            other => other,
        };
        request.insert(param.server_name, value);
    }

    request
}

/// Append the configuration name after every server parameter name in
/// `message`: `splitalgo` becomes `splitalgo (Data.splitting)`.
pub fn annotate_server_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        out.push_str(word);
        let names = crab_params::config_names_for(word);
        if !names.is_empty() {
            out.push_str(" (");
            out.push_str(&names.join(", "));
            out.push(')');
        }
        word.clear();
    };

    for c in message.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Annotate the detail and info headers of a server error.
pub fn annotate_server_headers(headers: &ServerErrorHeaders) -> ServerErrorHeaders {
    ServerErrorHeaders {
        detail: headers.detail.as_deref().map(annotate_server_message),
        info: headers.info.as_deref().map(annotate_server_message),
        id: headers.id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_bools() {
        let mut config = TaskConfiguration::new();
        config.set("General.transferLogs", false).unwrap();
        let request = translate(&config);

        assert_eq!(request.get_int("savelogsflag"), Some(0));
        assert_eq!(request.get_int("saveoutput"), Some(1));
        assert_eq!(request.get_str("generator"), Some("pythia"));
        assert!(!request.contains_key("asyncdest"));
    }

    #[test]
    fn test_aliases_resolved() {
        let mut config = TaskConfiguration::new();
        config.set("Data.inputDBS", "phys03").unwrap();
        let request = translate(&config);
        assert_eq!(
            request.get_str("dbsurl"),
            Some("https://cmsweb.cern.ch/dbs/prod/phys03/DBSReader")
        );
        assert_eq!(
            request.get_str("publishdbsurl"),
            Some("https://cmsweb.cern.ch/dbs/prod/phys03/DBSWriter")
        );
    }

    #[test]
    fn test_dict_sent_as_json() {
        let mut config = TaskConfiguration::from_toml_str(
            "[JobType]\nacceleratorParams = { GPUMemoryMB = 8000 }\n",
        )
        .unwrap();
        config.set("JobType.requireAccelerator", true).unwrap();
        let request = translate(&config);
        assert_eq!(
            request.get_str("acceleratorparams"),
            Some(r#"{"GPUMemoryMB":8000}"#)
        );
        assert_eq!(request.get_int("requireaccelerator"), Some(1));
    }

    #[test]
    fn test_annotate_message() {
        assert_eq!(
            annotate_server_message("Invalid input parameter: splitalgo"),
            "Invalid input parameter: splitalgo (Data.splitting)"
        );
        assert_eq!(
            annotate_server_message("asyncdest,sitewhitelist bad"),
            "asyncdest (Site.storageSite),sitewhitelist (Site.whitelist) bad"
        );
        assert_eq!(annotate_server_message("nothing known"), "nothing known");
    }

    #[test]
    fn test_annotate_headers_keeps_id() {
        let headers = ServerErrorHeaders {
            detail: Some("Invalid input parameter".into()),
            info: Some("totalunits".into()),
            id: Some("99".into()),
        };
        let annotated = annotate_server_headers(&headers);
        assert_eq!(annotated.info.as_deref(), Some("totalunits (Data.totalUnits)"));
        assert_eq!(annotated.id.as_deref(), Some("99"));
    }
}
