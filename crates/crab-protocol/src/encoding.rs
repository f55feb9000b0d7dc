//! Request parameter encoding.
//!
//! The server reads repeated keys as lists, so list values cannot be
//! comma-joined: every element is emitted as its own `key=value` pair.
//! Scalars are encoded first, then lists. Empty lists are omitted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;

/// A single parameter value as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl WireValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            WireValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, WireValue::List(_))
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Int(i) => write!(f, "{}", i),
            WireValue::Str(s) => f.write_str(s),
            WireValue::List(l) => write!(f, "[{}]", l.join(", ")),
        }
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::Str(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::Str(s)
    }
}

impl From<i64> for WireValue {
    fn from(i: i64) -> Self {
        WireValue::Int(i)
    }
}

impl From<i32> for WireValue {
    fn from(i: i32) -> Self {
        WireValue::Int(i64::from(i))
    }
}

impl From<u32> for WireValue {
    fn from(i: u32) -> Self {
        WireValue::Int(i64::from(i))
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        WireValue::Int(i64::from(b))
    }
}

impl From<Vec<String>> for WireValue {
    fn from(l: Vec<String>) -> Self {
        WireValue::List(l)
    }
}

/// Flat, ordered parameter map sent with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParams {
    params: BTreeMap<String, WireValue>,
}

/// The parameter map sent with a task submission.
pub type SubmissionRequest = RequestParams;

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<WireValue>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<WireValue> {
        self.params.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.params.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(WireValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(WireValue::as_int)
    }

    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(WireValue::as_list)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WireValue)> {
        self.params.iter()
    }

    /// Encode for a query string or form body.
    pub fn encode(&self) -> String {
        encode_params(self)
    }
}

impl<K: Into<String>, V: Into<WireValue>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = RequestParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Encode parameters, scalars first and list elements as repeated keys.
pub fn encode_params(params: &RequestParams) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());

    for (key, value) in params.iter() {
        match value {
            WireValue::Int(i) => {
                serializer.append_pair(key, &i.to_string());
            }
            WireValue::Str(s) => {
                serializer.append_pair(key, s);
            }
            WireValue::List(_) => {}
        }
    }

    for (key, value) in params.iter() {
        if let WireValue::List(items) = value {
            for item in items {
                serializer.append_pair(key, item);
            }
        }
    }

    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_before_lists() {
        let params = RequestParams::new()
            .with("sitewhitelist", vec!["T2_A".to_string(), "T2_B".to_string()])
            .with("algoargs", 10)
            .with("workflow", "demo");

        assert_eq!(
            params.encode(),
            "algoargs=10&workflow=demo&sitewhitelist=T2_A&sitewhitelist=T2_B"
        );
    }

    #[test]
    fn test_empty_list_omitted() {
        let params = RequestParams::new()
            .with("siteblacklist", Vec::<String>::new())
            .with("jobtype", "Analysis");
        assert_eq!(params.encode(), "jobtype=Analysis");
    }

    #[test]
    fn test_bool_becomes_int() {
        let params = RequestParams::new().with("publication", true).with("dryrun", false);
        assert_eq!(params.get_int("publication"), Some(1));
        assert_eq!(params.encode(), "dryrun=0&publication=1");
    }

    #[test]
    fn test_special_characters_escaped() {
        let params = RequestParams::new()
            .with("inputdata", "/A/B-C/MINIAOD")
            .with("scriptargs", vec!["a=b c".to_string()]);
        assert_eq!(
            params.encode(),
            "inputdata=%2FA%2FB-C%2FMINIAOD&scriptargs=a%3Db+c"
        );
    }
}
