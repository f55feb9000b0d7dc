//! Failure Injection for the Mock Server
//!
//! Makes chosen routes answer with an error status or a transport failure,
//! optionally only for the first few calls.

use crab_protocol::Verb;

use crate::transport::{HttpResponse, TransportError};

/// How a route fails.
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// HTTP status to answer with
    pub status: Option<u16>,
    /// Transport failure to raise instead of answering
    pub transport: Option<TransportError>,
    /// Extra response headers (`X-Error-*`)
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Answer with an HTTP error status
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            transport: None,
            headers: Vec::new(),
            body: String::new(),
            fail_count: None,
        }
    }

    /// Fail before any response is received
    pub fn transport(error: TransportError) -> Self {
        Self {
            status: None,
            transport: Some(error),
            headers: Vec::new(),
            body: String::new(),
            fail_count: None,
        }
    }

    /// A 400 carrying the structured error headers
    pub fn server_error(detail: &str, info: &str, id: &str) -> Self {
        Self::status(400)
            .with_header("X-Error-Detail", detail)
            .with_header("X-Error-Info", info)
            .with_header("X-Error-Id", id)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    fn outcome(&self) -> Result<HttpResponse, TransportError> {
        if let Some(error) = &self.transport {
            return Err(error.clone());
        }
        let mut response = HttpResponse::new(self.status.unwrap_or(500), self.body.clone());
        response.headers = self.headers.clone();
        Ok(response)
    }
}

#[derive(Debug)]
struct Injection {
    verb: Verb,
    prefix: String,
    config: FailureConfig,
    calls: u32,
}

/// Per-route failure injections
#[derive(Debug, Default)]
pub struct FailureInjector {
    injections: Vec<Injection>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail requests whose path starts with `prefix`
    pub fn inject(&mut self, verb: Verb, prefix: impl Into<String>, config: FailureConfig) {
        let prefix = prefix.into();
        self.injections
            .retain(|i| !(i.verb == verb && i.prefix == prefix));
        self.injections.push(Injection {
            verb,
            prefix,
            config,
            calls: 0,
        });
    }

    pub fn clear(&mut self) {
        self.injections.clear();
    }

    /// The injected outcome for a request, if it should fail
    pub fn check(
        &mut self,
        verb: Verb,
        path: &str,
    ) -> Option<Result<HttpResponse, TransportError>> {
        let injection = self
            .injections
            .iter_mut()
            .filter(|i| i.verb == verb && path.starts_with(&i.prefix))
            .max_by_key(|i| i.prefix.len())?;

        injection.calls += 1;
        if let Some(limit) = injection.config.fail_count {
            if injection.calls > limit {
                return None;
            }
        }
        Some(injection.config.outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_injection() {
        let mut injector = FailureInjector::new();
        assert!(injector.check(Verb::Get, "/crabserver/prod/info").is_none());
    }

    #[test]
    fn test_fail_count() {
        let mut injector = FailureInjector::new();
        injector.inject(
            Verb::Put,
            "/crabserver/prod/workflow",
            FailureConfig::status(503).with_fail_count(2),
        );

        for _ in 0..2 {
            let outcome = injector.check(Verb::Put, "/crabserver/prod/workflow").unwrap();
            assert_eq!(outcome.unwrap().status, 503);
        }
        assert!(injector.check(Verb::Put, "/crabserver/prod/workflow").is_none());
    }

    #[test]
    fn test_verb_must_match() {
        let mut injector = FailureInjector::new();
        injector.inject(Verb::Put, "/", FailureConfig::status(500));
        assert!(injector.check(Verb::Get, "/crabserver").is_none());
    }

    #[test]
    fn test_transport_failure() {
        let mut injector = FailureInjector::new();
        injector.inject(
            Verb::Get,
            "/",
            FailureConfig::transport(TransportError::Tls("handshake".into())),
        );
        let outcome = injector.check(Verb::Get, "/x").unwrap();
        assert!(matches!(outcome, Err(TransportError::Tls(_))));
    }

    #[test]
    fn test_server_error_headers() {
        let mut injector = FailureInjector::new();
        injector.inject(
            Verb::Put,
            "/",
            FailureConfig::server_error("Invalid input parameter", "splitalgo", "7"),
        );
        let response = injector.check(Verb::Put, "/w").unwrap().unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.header("X-Error-Info"), Some("splitalgo"));
    }
}
