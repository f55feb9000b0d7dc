//! The `{"result": [...]}` response envelope and structured error headers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const HEADER_ERROR_DETAIL: &str = "X-Error-Detail";
pub const HEADER_ERROR_INFO: &str = "X-Error-Info";
pub const HEADER_ERROR_ID: &str = "X-Error-Id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("response has no 'result' list")]
    MissingResult,

    #[error("response 'result' list is empty")]
    EmptyResult,

    #[error("unexpected result shape: {0}")]
    Shape(String),
}

/// All entries of the `result` list.
pub fn results(body: &Value) -> Result<&[Value], EnvelopeError> {
    body.get("result")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or(EnvelopeError::MissingResult)
}

/// The first entry of the `result` list.
pub fn first_result(body: &Value) -> Result<&Value, EnvelopeError> {
    results(body)?.first().ok_or(EnvelopeError::EmptyResult)
}

/// Decode the first result into a typed value.
pub fn decode_first<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, EnvelopeError> {
    let first = first_result(body)?;
    serde_json::from_value(first.clone()).map_err(|e| EnvelopeError::Shape(e.to_string()))
}

/// Structured error headers the server attaches to failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorHeaders {
    pub detail: Option<String>,
    pub info: Option<String>,
    pub id: Option<String>,
}

impl ServerErrorHeaders {
    /// Collect headers from `(name, value)` pairs, names compared
    /// case-insensitively.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let slot = if name.eq_ignore_ascii_case(HEADER_ERROR_DETAIL) {
                &mut headers.detail
            } else if name.eq_ignore_ascii_case(HEADER_ERROR_INFO) {
                &mut headers.info
            } else if name.eq_ignore_ascii_case(HEADER_ERROR_ID) {
                &mut headers.id
            } else {
                continue;
            };
            *slot = Some(value.trim().to_string());
        }
        headers
    }

    pub fn is_empty(&self) -> bool {
        self.detail.is_none() && self.info.is_none() && self.id.is_none()
    }

    /// One-line summary such as `Invalid input parameter (splitalgo) [id 42]`.
    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(detail) = &self.detail {
            parts.push(detail.clone());
        }
        if let Some(info) = &self.info {
            parts.push(format!("({})", info));
        }
        if let Some(id) = &self.id {
            parts.push(format!("[id {}]", id));
        }
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_result() {
        let body = json!({"result": [{"RequestName": "demo_unique_001"}]});
        assert_eq!(
            first_result(&body).unwrap()["RequestName"],
            "demo_unique_001"
        );
    }

    #[test]
    fn test_missing_and_empty() {
        assert_eq!(
            first_result(&json!({"desc": {}})),
            Err(EnvelopeError::MissingResult)
        );
        assert_eq!(
            first_result(&json!({"result": []})),
            Err(EnvelopeError::EmptyResult)
        );
    }

    #[test]
    fn test_headers_case_insensitive() {
        let headers = ServerErrorHeaders::from_pairs([
            ("x-error-detail", "Invalid input parameter"),
            ("X-Error-Info", "splitalgo "),
            ("Content-Type", "application/json"),
        ]);
        assert_eq!(headers.detail.as_deref(), Some("Invalid input parameter"));
        assert_eq!(headers.info.as_deref(), Some("splitalgo"));
        assert_eq!(headers.id, None);
        assert_eq!(
            headers.summary().as_deref(),
            Some("Invalid input parameter (splitalgo)")
        );
    }

    #[test]
    fn test_empty_headers_no_summary() {
        assert!(ServerErrorHeaders::default().summary().is_none());
    }
}
