//! Payloads of the `info` resource.

use serde::{Deserialize, Serialize};

/// `info?subresource=delegatedn`: DNs allowed to retrieve the delegated
/// credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateDnInfo {
    /// DN of the REST front end itself.
    #[serde(default)]
    pub rest: Option<String>,
    /// DNs of the task workers.
    #[serde(default)]
    pub services: Vec<String>,
}

impl DelegateDnInfo {
    /// Retriever pattern passed to the credential store: every DN, the
    /// front end's first, joined with `|`.
    pub fn retriever_pattern(&self) -> String {
        self.rest
            .iter()
            .chain(self.services.iter())
            .map(String::as_str)
            .filter(|dn| !dn.is_empty())
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// `info?subresource=backendurls`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUrls {
    /// Sandbox cache endpoint.
    #[serde(rename = "cacheSSL")]
    pub cache_ssl: String,
    #[serde(rename = "htcondorSchedds", default, skip_serializing_if = "Option::is_none")]
    pub schedds: Option<serde_json::Value>,
}

/// `info?subresource=version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    #[serde(rename = "crabserver", default)]
    pub server: Option<String>,
    #[serde(default)]
    pub compatible_version: Vec<String>,
}

impl ServerVersion {
    /// Whether `client` is among the advertised compatible versions.
    ///
    /// An entry matches the version itself or any release below it
    /// (`0.1` matches `0.1.3`). An empty list accepts everything.
    pub fn is_compatible(&self, client: &str) -> bool {
        self.compatible_version.is_empty()
            || self.compatible_version.iter().any(|v| {
                client == v
                    || client
                        .strip_prefix(v.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retriever_pattern() {
        let info: DelegateDnInfo = serde_json::from_value(json!({
            "rest": "/DC=ch/CN=rest",
            "services": ["/DC=ch/CN=tw1", "/DC=ch/CN=tw2"]
        }))
        .unwrap();
        assert_eq!(
            info.retriever_pattern(),
            "/DC=ch/CN=rest|/DC=ch/CN=tw1|/DC=ch/CN=tw2"
        );
    }

    #[test]
    fn test_backend_urls() {
        let urls: BackendUrls =
            serde_json::from_value(json!({"cacheSSL": "https://cache.example/crabcache"}))
                .unwrap();
        assert_eq!(urls.cache_ssl, "https://cache.example/crabcache");
    }

    #[test]
    fn test_version_compatibility() {
        let v = ServerVersion {
            server: Some("v3.240101".into()),
            compatible_version: vec!["0.1".into(), "0.2.0".into()],
        };
        assert!(v.is_compatible("0.1.0"));
        assert!(v.is_compatible("0.2.0"));
        assert!(!v.is_compatible("0.10.0"));
        assert!(!v.is_compatible("0.3.0"));
        assert!(ServerVersion::default().is_compatible("9.9.9"));
    }
}
