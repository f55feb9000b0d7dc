//! Retry behaviour of the REST client against the mock server

use std::sync::Arc;

use crab_client::mock::{FailureConfig, MockTransport};
use crab_client::transport::{RestClient, RetryPolicy, Transport, TransportError};
use crab_client::Classify;
use crab_protocol::endpoint::resource;
use crab_protocol::{RequestParams, ServerInstance, Verb};

const WORKFLOW: &str = "/crabserver/prod/workflow";

fn client(retries: u32) -> (Arc<MockTransport>, RestClient) {
    let instance = ServerInstance::resolve("prod", None, None).unwrap();
    let server = Arc::new(MockTransport::crab_server(&instance));
    let transport: Arc<dyn Transport> = server.clone();
    let client = RestClient::with_policy(transport, instance, RetryPolicy::immediate(retries));
    (server, client)
}

fn status_query() -> RequestParams {
    RequestParams::new().with("workflow", "demo_unique_001")
}

#[test]
fn test_unavailable_server_exhausts_every_attempt() {
    for (retries, expected) in [(0, 3), (2, 3), (5, 6)] {
        let (server, client) = client(retries);
        server.inject(Verb::Get, WORKFLOW, FailureConfig::status(503));

        let err = client.get(resource::WORKFLOW, &status_query()).unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(err.attempts(), expected);
        assert_eq!(server.requests_to(Verb::Get, WORKFLOW).len(), expected as usize);
        assert_eq!(err.exit_code().as_i32(), 30);
    }
}

#[test]
fn test_non_retriable_status_still_gets_two_retries() {
    let (server, client) = client(5);
    server.inject(Verb::Get, WORKFLOW, FailureConfig::status(404));

    let err = client.get(resource::WORKFLOW, &status_query()).unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(server.requests_to(Verb::Get, WORKFLOW).len(), 3);
}

#[test]
fn test_transient_failure_recovers() {
    let (server, client) = client(2);
    server.inject(
        Verb::Get,
        WORKFLOW,
        FailureConfig::status(502).with_fail_count(2),
    );

    let response = client.get(resource::WORKFLOW, &status_query()).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(server.requests_to(Verb::Get, WORKFLOW).len(), 3);
}

#[test]
fn test_connect_timeout_is_retried() {
    let (server, client) = client(4);
    server.inject(
        Verb::Get,
        WORKFLOW,
        FailureConfig::transport(TransportError::ConnectTimeout("10s".into())),
    );

    let err = client.get(resource::WORKFLOW, &status_query()).unwrap_err();

    assert_eq!(err.status(), None);
    assert_eq!(err.attempts(), 5);
}

#[test]
fn test_refused_connection_is_not_retried_past_the_minimum() {
    let (server, client) = client(5);
    server.inject(
        Verb::Get,
        WORKFLOW,
        FailureConfig::transport(TransportError::Connection("refused".into())),
    );

    let err = client.get(resource::WORKFLOW, &status_query()).unwrap_err();

    assert_eq!(err.attempts(), 3);
    assert_eq!(server.requests_to(Verb::Get, WORKFLOW).len(), 3);
}

#[test]
fn test_server_error_headers_are_kept() {
    let (server, client) = client(0);
    server.inject(
        Verb::Put,
        WORKFLOW,
        FailureConfig::server_error("Invalid input parameter", "splitalgo", "abc123"),
    );

    let err = client
        .put(resource::WORKFLOW, &RequestParams::new().with("workflow", "x"))
        .unwrap_err();

    let headers = err.server_headers().unwrap();
    assert_eq!(headers.info.as_deref(), Some("splitalgo"));
    assert_eq!(headers.id.as_deref(), Some("abc123"));
    assert_eq!(server.requests_to(Verb::Put, WORKFLOW).len(), 3);
}
