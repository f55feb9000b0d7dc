//! In-process REST server.
//!
//! Routes are matched by verb and path prefix, the longest prefix winning.
//! Each route holds a queue of outcomes; the last one repeats forever.
//! Unrouted requests get a 404.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crab_protocol::endpoint::{resource, subresource};
use crab_protocol::{ServerInstance, Verb};
use serde_json::{json, Value};

use super::failure::{FailureConfig, FailureInjector};
use crate::transport::{
    Connector, HttpRequest, HttpResponse, TlsSettings, Transport, TransportError,
};

/// Cache endpoint advertised by [`MockTransport::crab_server`].
pub const MOCK_CACHE_URL: &str = "https://cmsweb.cern.ch/crabcache";

/// Request name the preset server assigns.
pub const MOCK_REQUEST_NAME: &str = "demo_unique_001";

/// DN of the preset server's REST front end.
pub const MOCK_REST_DN: &str = "/DC=ch/DC=cern/OU=computers/CN=crab-rest.cern.ch";

type Outcome = Result<HttpResponse, TransportError>;

#[derive(Debug)]
struct Route {
    verb: Verb,
    prefix: String,
    outcomes: VecDeque<Outcome>,
}

impl Route {
    fn next(&mut self) -> Outcome {
        if self.outcomes.len() > 1 {
            self.outcomes
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
        } else {
            self.outcomes
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
        }
    }
}

/// Wrap results in the `{"result": [...]}` envelope.
pub fn envelope(results: Vec<Value>) -> HttpResponse {
    HttpResponse::new(200, json!({ "result": results }).to_string())
        .with_header("Content-Type", "application/json")
}

/// Scripted REST server.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    failures: Mutex<FailureInjector>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server answering everything a submission needs.
    pub fn crab_server(instance: &ServerInstance) -> Self {
        let server = Self::new();
        let info = instance.resource_path(resource::INFO);
        let workflow = instance.resource_path(resource::WORKFLOW);

        server.respond(
            Verb::Get,
            format!("{}?subresource={}", info, subresource::DELEGATE_DN),
            envelope(vec![json!({
                "rest": MOCK_REST_DN,
                "services": ["/DC=ch/DC=cern/OU=computers/CN=crab-tw.cern.ch"],
            })]),
        );
        server.respond(
            Verb::Get,
            format!("{}?subresource={}", info, subresource::BACKEND_URLS),
            envelope(vec![json!({
                "cacheSSL": MOCK_CACHE_URL,
                "htcondorSchedds": {},
            })]),
        );
        server.respond(
            Verb::Get,
            format!("{}?subresource={}", info, subresource::VERSION),
            envelope(vec![json!({
                "crabserver": "v3.mock",
                "compatible_version": [],
            })]),
        );
        server.respond(
            Verb::Put,
            "/crabcache/file",
            envelope(vec![json!({ "hashkey": "uploaded" })]),
        );
        server.respond(
            Verb::Put,
            workflow.clone(),
            envelope(vec![json!({ "RequestName": MOCK_REQUEST_NAME })]),
        );
        server.respond(
            Verb::Get,
            workflow.clone(),
            envelope(vec![json!({
                "status": "SUBMITTED",
                "jobsPerStatus": { "running": 8, "idle": 2 },
                "taskWarningMsg": [],
            })]),
        );
        server.respond(
            Verb::Delete,
            workflow.clone(),
            envelope(vec![json!({ "result": "ok" })]),
        );
        server.respond(
            Verb::Post,
            workflow,
            envelope(vec![json!({ "result": "ok" })]),
        );
        server
    }

    fn push(&self, verb: Verb, prefix: String, outcome: Outcome) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes
            .iter_mut()
            .find(|r| r.verb == verb && r.prefix == prefix)
        {
            Some(route) => route.outcomes.push_back(outcome),
            None => routes.push(Route {
                verb,
                prefix,
                outcomes: VecDeque::from([outcome]),
            }),
        }
    }

    /// Queue a response for a route.
    pub fn respond(&self, verb: Verb, prefix: impl Into<String>, response: HttpResponse) -> &Self {
        self.push(verb, prefix.into(), Ok(response));
        self
    }

    /// Queue a transport failure for a route.
    pub fn fail(&self, verb: Verb, prefix: impl Into<String>, error: TransportError) -> &Self {
        self.push(verb, prefix.into(), Err(error));
        self
    }

    /// Replace a route's queue with a single repeating response.
    pub fn replace(&self, verb: Verb, prefix: impl Into<String>, response: HttpResponse) -> &Self {
        let prefix = prefix.into();
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|r| !(r.verb == verb && r.prefix == prefix));
        self.respond(verb, prefix, response)
    }

    /// Inject a failure ahead of the scripted responses.
    pub fn inject(&self, verb: Verb, prefix: impl Into<String>, config: FailureConfig) -> &Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inject(verb, prefix, config);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Requests with this verb whose path starts with `prefix`.
    pub fn requests_to(&self, verb: Verb, prefix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.verb == verb && r.path_and_query().starts_with(prefix))
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let path = request.path_and_query();
        if let Some(outcome) = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check(request.verb, path)
        {
            return outcome;
        }

        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes
            .iter_mut()
            .filter(|r| r.verb == request.verb && path.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
        {
            Some(route) => route.next(),
            None => Ok(HttpResponse::new(404, format!("no route for {}", path))),
        }
    }
}

/// Hands out one shared [`MockTransport`], recording connections.
#[derive(Debug)]
pub struct MockConnector {
    transport: Arc<MockTransport>,
    connects: Mutex<Vec<TlsSettings>>,
    failure: Option<TransportError>,
}

impl MockConnector {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self {
            transport,
            connects: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// A connector whose every connect fails.
    pub fn failing(error: TransportError) -> Self {
        Self {
            transport: Arc::new(MockTransport::new()),
            connects: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    pub fn transport(&self) -> &Arc<MockTransport> {
        &self.transport
    }

    /// TLS settings of every connect so far.
    pub fn connects(&self) -> Vec<TlsSettings> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, tls: &TlsSettings) -> Result<Arc<dyn Transport>, TransportError> {
        self.connects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tls.clone());
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prod() -> ServerInstance {
        ServerInstance::resolve("prod", None, None).unwrap()
    }

    #[test]
    fn test_unrouted_is_404() {
        let server = MockTransport::new();
        let resp = server
            .send(&HttpRequest::new(Verb::Get, "https://h/nowhere"))
            .unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn test_queue_then_repeat_last() {
        let server = MockTransport::new();
        server
            .respond(Verb::Get, "/a", HttpResponse::new(503, ""))
            .respond(Verb::Get, "/a", HttpResponse::new(200, "{}"));
        let req = HttpRequest::new(Verb::Get, "https://h/a?x=1");
        assert_eq!(server.send(&req).unwrap().status, 503);
        assert_eq!(server.send(&req).unwrap().status, 200);
        assert_eq!(server.send(&req).unwrap().status, 200);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let server = MockTransport::crab_server(&prod());
        let req = HttpRequest::new(
            Verb::Get,
            "https://cmsweb.cern.ch/crabserver/prod/info?subresource=backendurls",
        );
        let body: Value = serde_json::from_slice(&server.send(&req).unwrap().body).unwrap();
        assert_eq!(body["result"][0]["cacheSSL"], MOCK_CACHE_URL);
    }

    #[test]
    fn test_injected_failure_precedes_routes() {
        let server = MockTransport::crab_server(&prod());
        server.inject(
            Verb::Put,
            "/crabserver/prod/workflow",
            FailureConfig::status(503).with_fail_count(1),
        );
        let req = HttpRequest::new(Verb::Put, "https://cmsweb.cern.ch/crabserver/prod/workflow");
        assert_eq!(server.send(&req).unwrap().status, 503);
        assert_eq!(server.send(&req).unwrap().status, 200);
        assert_eq!(server.requests_to(Verb::Put, "/crabserver").len(), 2);
    }

    #[test]
    fn test_connector_records_connects() {
        let connector = MockConnector::new(Arc::new(MockTransport::new()));
        let tls = TlsSettings {
            identity: "/tmp/x509up_u1".into(),
            ca_dir: "/etc/grid-security/certificates".into(),
            timeout: std::time::Duration::from_secs(1),
        };
        assert!(connector.connect(&tls).is_ok());
        assert_eq!(connector.connects(), vec![tls]);

        let failing = MockConnector::failing(TransportError::Setup("bad pem".into()));
        assert!(failing.connect(&connector.connects()[0]).is_err());
    }
}
