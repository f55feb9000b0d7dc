//! REST client
//!
//! Wraps a `Transport` with the retry policy, parameter encoding, JSON
//! decoding and error context.

use std::sync::Arc;
use std::thread;

use crab_protocol::{
    decode_first, EnvelopeError, RequestParams, ServerErrorHeaders, ServerInstance, Verb,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::retry::{is_retriable_status, RetryPolicy};
use super::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::failure::{Classify, FailureKind};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Server communication errors
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("{verb} {url} returned HTTP {status} {reason}{}", header_suffix(.headers))]
    Http {
        verb: Verb,
        url: String,
        status: u16,
        reason: String,
        body: String,
        headers: ServerErrorHeaders,
        attempts: u32,
    },

    #[error("{verb} {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        verb: Verb,
        url: String,
        #[source]
        source: TransportError,
        attempts: u32,
    },

    #[error("{verb} {url} returned a body that is not JSON: {message}")]
    Decode {
        verb: Verb,
        url: String,
        message: String,
    },
}

fn header_suffix(headers: &ServerErrorHeaders) -> String {
    headers
        .summary()
        .map(|s| format!(": {}", s))
        .unwrap_or_default()
}

impl RestError {
    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured `X-Error-*` headers, when a response was received.
    pub fn server_headers(&self) -> Option<&ServerErrorHeaders> {
        match self {
            RestError::Http { headers, .. } => Some(headers),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RestError::Http { attempts, .. } | RestError::Transport { attempts, .. } => *attempts,
            RestError::Decode { .. } => 1,
        }
    }
}

impl Classify for RestError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::RestCommunication
    }
}

/// A successful (HTTP 200) response.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub body: Value,
    pub status: u16,
    pub reason: String,
}

impl RestResponse {
    /// First entry of the `result` list, typed.
    pub fn first<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        decode_first(&self.body)
    }
}

/// Client for one REST server instance.
pub struct RestClient {
    transport: Arc<dyn Transport>,
    instance: ServerInstance,
    policy: RetryPolicy,
}

impl RestClient {
    pub fn new(transport: Arc<dyn Transport>, instance: ServerInstance) -> Self {
        Self::with_policy(transport, instance, RetryPolicy::default())
    }

    pub fn with_policy(
        transport: Arc<dyn Transport>,
        instance: ServerInstance,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            instance,
            policy,
        }
    }

    pub fn instance(&self) -> &ServerInstance {
        &self.instance
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Absolute URL for `uri`: absolute URIs are kept, paths are joined to
    /// the instance's base URL.
    fn absolute(&self, uri: &str) -> String {
        if uri.starts_with("https://") || uri.starts_with("http://") {
            uri.to_string()
        } else if uri.starts_with('/') {
            format!("{}{}", self.instance.base_url(), uri)
        } else {
            format!("{}/{}", self.instance.base_url(), uri)
        }
    }

    fn build(&self, verb: Verb, uri: &str, data: Option<&RequestParams>) -> HttpRequest {
        let mut url = self.absolute(uri);
        let encoded = data.map(RequestParams::encode).unwrap_or_default();

        if verb.uses_query() {
            if !encoded.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&encoded);
            }
            HttpRequest::new(verb, url)
        } else {
            HttpRequest::new(verb, url).with_body(encoded.into_bytes(), FORM_CONTENT_TYPE)
        }
    }

    /// Send `request`, retrying per the policy, and decode a 200 body.
    fn execute(&self, request: HttpRequest) -> Result<RestResponse, RestError> {
        let total = self.policy.total_attempts();
        let mut attempt = 1;
        loop {
            debug!(verb = %request.verb, url = %request.url, attempt, total, "sending request");

            let (error, retriable) = match self.transport.send(&request) {
                Ok(response) if response.status == 200 => return decode(&request, response),
                Ok(response) => {
                    let retriable = is_retriable_status(response.status);
                    (http_error(&request, response, attempt), retriable)
                }
                Err(source) => {
                    let retriable = source.is_retriable();
                    let error = RestError::Transport {
                        verb: request.verb,
                        url: request.url.clone(),
                        source,
                        attempts: attempt,
                    };
                    (error, retriable)
                }
            };

            if !self.policy.should_retry(attempt, retriable) {
                return Err(error);
            }

            let wait = self.policy.backoff(attempt);
            warn!(
                "attempt {}/{} failed ({}); retrying in {:.0}s",
                attempt,
                total,
                error,
                wait.as_secs_f64()
            );
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            attempt += 1;
        }
    }

    /// `request(verb, uri, data)`: encode `data`, send with retries and
    /// decode the JSON body.
    pub fn request(
        &self,
        verb: Verb,
        uri: &str,
        data: Option<&RequestParams>,
    ) -> Result<RestResponse, RestError> {
        self.execute(self.build(verb, uri, data))
    }

    /// GET an instance resource.
    pub fn get(&self, resource: &str, data: &RequestParams) -> Result<RestResponse, RestError> {
        self.request(Verb::Get, &self.instance.resource_path(resource), Some(data))
    }

    pub fn put(&self, resource: &str, data: &RequestParams) -> Result<RestResponse, RestError> {
        self.request(Verb::Put, &self.instance.resource_path(resource), Some(data))
    }

    pub fn post(&self, resource: &str, data: &RequestParams) -> Result<RestResponse, RestError> {
        self.request(Verb::Post, &self.instance.resource_path(resource), Some(data))
    }

    pub fn delete(&self, resource: &str, data: &RequestParams) -> Result<RestResponse, RestError> {
        self.request(Verb::Delete, &self.instance.resource_path(resource), Some(data))
    }

    /// PUT raw bytes to an absolute URL (the sandbox cache).
    pub fn upload(&self, url: &str, bytes: Vec<u8>) -> Result<RestResponse, RestError> {
        let request =
            HttpRequest::new(Verb::Put, self.absolute(url)).with_body(bytes, UPLOAD_CONTENT_TYPE);
        self.execute(request)
    }
}

fn http_error(request: &HttpRequest, response: HttpResponse, attempt: u32) -> RestError {
    let headers = ServerErrorHeaders::from_pairs(
        response
            .headers
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str())),
    );
    RestError::Http {
        verb: request.verb,
        url: request.url.clone(),
        status: response.status,
        body: response.body_text(),
        reason: response.reason,
        headers,
        attempts: attempt,
    }
}

fn decode(request: &HttpRequest, response: HttpResponse) -> Result<RestResponse, RestError> {
    let body = if response.body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&response.body).map_err(|e| RestError::Decode {
            verb: request.verb,
            url: request.url.clone(),
            message: e.to_string(),
        })?
    };
    Ok(RestResponse {
        body,
        status: response.status,
        reason: response.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed list of outcomes, repeating the last one.
    struct Replay {
        outcomes: Vec<Result<HttpResponse, TransportError>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Replay {
        fn new(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Transport for Replay {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(request.clone());
            let index = (seen.len() - 1).min(self.outcomes.len() - 1);
            self.outcomes[index].clone()
        }
    }

    fn client(transport: Arc<Replay>, retries: u32) -> RestClient {
        let instance = ServerInstance::resolve("prod", None, None).unwrap();
        RestClient::with_policy(transport, instance, RetryPolicy::immediate(retries))
    }

    #[test]
    fn test_get_puts_params_in_query() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(200, r#"{"result":[]}"#))]);
        let client = client(replay.clone(), 2);
        let params = RequestParams::new().with("subresource", "version");
        client.get("info", &params).unwrap();

        let seen = replay.seen.lock().unwrap();
        assert_eq!(
            seen[0].url,
            "https://cmsweb.cern.ch/crabserver/prod/info?subresource=version"
        );
        assert!(seen[0].body.is_none());
    }

    #[test]
    fn test_put_sends_form_body() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(200, r#"{"result":[]}"#))]);
        let client = client(replay.clone(), 2);
        let params = RequestParams::new()
            .with("workflow", "demo")
            .with("sitewhitelist", vec!["T2_A".to_string(), "T2_B".to_string()]);
        client.put("workflow", &params).unwrap();

        let seen = replay.seen.lock().unwrap();
        assert_eq!(seen[0].content_type.as_deref(), Some(FORM_CONTENT_TYPE));
        assert_eq!(
            seen[0].body_text(),
            Some("workflow=demo&sitewhitelist=T2_A&sitewhitelist=T2_B")
        );
    }

    #[test]
    fn test_always_503_exhausts_attempts() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(503, "down"))]);
        let err = client(replay.clone(), 4).get("info", &RequestParams::new()).unwrap_err();
        assert_eq!(replay.count(), 5);
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.attempts(), 5);
    }

    #[test]
    fn test_non_retriable_stops_after_two_retries() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(404, "gone"))]);
        let err = client(replay.clone(), 10).get("info", &RequestParams::new()).unwrap_err();
        assert_eq!(replay.count(), 3);
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn test_non_retriable_transport_errors_stop_after_two_retries() {
        for error in [
            TransportError::Connection("refused".into()),
            TransportError::Certificate("unknown issuer".into()),
            TransportError::Timeout("read".into()),
        ] {
            let replay = Replay::new(vec![Err(error)]);
            let err = client(replay.clone(), 5).get("info", &RequestParams::new()).unwrap_err();
            assert_eq!(replay.count(), 3);
            assert_eq!(err.attempts(), 3);
            assert_eq!(err.status(), None);
        }
    }

    #[test]
    fn test_recovers_after_transient_errors() {
        let replay = Replay::new(vec![
            Err(TransportError::ConnectTimeout("slow".into())),
            Ok(HttpResponse::new(502, "")),
            Ok(HttpResponse::new(200, r#"{"result":[{"RequestName":"x"}]}"#)),
        ]);
        let response = client(replay.clone(), 2)
            .get("workflow", &RequestParams::new())
            .unwrap();
        assert_eq!(replay.count(), 3);
        assert_eq!(response.body["result"][0]["RequestName"], "x");
    }

    #[test]
    fn test_error_headers_captured() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(400, "bad")
            .with_header("X-Error-Detail", "Invalid input parameter")
            .with_header("X-Error-Info", "splitalgo")
            .with_header("X-Error-Id", "42"))]);
        let err = client(replay, 0).put("workflow", &RequestParams::new()).unwrap_err();
        let headers = err.server_headers().unwrap();
        assert_eq!(headers.info.as_deref(), Some("splitalgo"));
        assert!(err.to_string().contains("HTTP 400"));
        assert!(err.to_string().contains("[id 42]"));
        assert_eq!(err.failure_kind(), FailureKind::RestCommunication);
    }

    #[test]
    fn test_bad_json_is_not_retried() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(200, "<html>"))]);
        let err = client(replay.clone(), 2).get("info", &RequestParams::new()).unwrap_err();
        assert!(matches!(err, RestError::Decode { .. }));
        assert_eq!(replay.count(), 1);
    }

    #[test]
    fn test_upload_uses_absolute_url() {
        let replay = Replay::new(vec![Ok(HttpResponse::new(200, ""))]);
        let client = client(replay.clone(), 2);
        let response = client
            .upload("https://cache.example/crabcache/file?hashkey=ab", vec![1, 2, 3])
            .unwrap();
        assert_eq!(response.body, Value::Null);

        let seen = replay.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://cache.example/crabcache/file?hashkey=ab");
        assert_eq!(seen[0].body.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
