//! HTTP Transport
//!
//! - `Transport`: sends one HTTP request, no retries
//! - `Connector`: builds a transport once the proxy file is ready
//! - `HttpTransport`: native HTTPS with client-certificate auth
//! - `RestClient`: the retry policy, JSON decoding and error context

mod http;
mod rest;
mod retry;

pub use http::{HttpConnector, HttpTransport, TlsSettings};
pub use rest::{RestClient, RestError, RestResponse};
pub use retry::{is_retriable_status, RetryPolicy};

use crab_protocol::{EnvelopeError, InstanceError, ServerInstance, Verb};
use std::sync::Arc;

use crate::failure::{Classify, FailureKind};

/// One HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub verb: Verb,
    /// Absolute URL including any query string.
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl HttpRequest {
    pub fn new(verb: Verb, url: impl Into<String>) -> Self {
        Self {
            verb,
            url: url.into(),
            body: None,
            content_type: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body = Some(body);
        self.content_type = Some(content_type.into());
        self
    }

    /// Path and query, without scheme and host.
    pub fn path_and_query(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        without_scheme
            .find('/')
            .map(|i| &without_scheme[i..])
            .unwrap_or("/")
    }

    /// Body as text, for form-encoded requests.
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// One HTTP response, any status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: default_reason(status).to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn default_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Request Entity Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// Transport errors (no HTTP response was received)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection timed out: {0}")]
    ConnectTimeout(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("server certificate rejected: {0}")]
    Certificate(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("cannot set up HTTPS client: {0}")]
    Setup(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Connection timeouts and TLS handshake failures are transient. A
    /// read timeout may follow a request the server already acted on.
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::ConnectTimeout(_) | TransportError::Tls(_))
    }
}

impl Classify for TransportError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            // Unreadable proxy or CA material
            TransportError::Setup(_) => FailureKind::Environment,
            _ => FailureKind::RestCommunication,
        }
    }
}

impl Classify for InstanceError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

impl Classify for EnvelopeError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::RestCommunication
    }
}

/// Sends HTTP requests.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Builds a transport authenticated with the given TLS material.
pub trait Connector: Send + Sync {
    fn connect(&self, tls: &TlsSettings) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Connect with `tls` and wrap the transport in a client for `instance`.
pub fn connect_client(
    connector: &dyn Connector,
    tls: &TlsSettings,
    instance: ServerInstance,
    policy: RetryPolicy,
) -> Result<RestClient, TransportError> {
    let transport = connector.connect(tls)?;
    tracing::debug!(host = %instance.authority(), db = %instance.db_instance, "connected");
    Ok(RestClient::with_policy(transport, instance, policy))
}
