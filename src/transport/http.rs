//! HTTPS transport with X.509 client authentication.

use std::error::Error as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crab_protocol::{Verb, CLIENT_VERSION};
use reqwest::blocking::Client;
use reqwest::{Certificate, Identity, Method};

use super::{Connector, HttpRequest, HttpResponse, Transport, TransportError};
use crate::environment::ClientEnvironment;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client certificate and trust anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM file holding certificate, key and chain (the proxy).
    pub identity: PathBuf,
    /// Directory of trusted CA certificates.
    pub ca_dir: PathBuf,
    pub timeout: Duration,
}

impl TlsSettings {
    /// The proxy as identity and the grid CA directory as trust anchors.
    pub fn for_environment(env: &ClientEnvironment, timeout: Duration) -> Self {
        Self {
            identity: env.proxy_path.clone(),
            ca_dir: env.cert_dir.clone(),
            timeout,
        }
    }
}

/// reqwest-based transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(tls: &TlsSettings) -> Result<Self, TransportError> {
        let pem = fs::read(&tls.identity).map_err(|e| {
            TransportError::Setup(format!("cannot read {}: {}", tls.identity.display(), e))
        })?;
        let identity = Identity::from_pem(&pem)
            .map_err(|e| TransportError::Setup(format!("bad client identity: {}", e)))?;

        let mut builder = Client::builder()
            .identity(identity)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(tls.timeout)
            .user_agent(format!("crab-client/{}", CLIENT_VERSION));
        for cert in load_ca_dir(&tls.ca_dir)? {
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Load every PEM certificate in a CA directory. Files that do not parse
/// (signing policies, CRLs) are skipped.
fn load_ca_dir(dir: &Path) -> Result<Vec<Certificate>, TransportError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| TransportError::Setup(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut certs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| TransportError::Io(e.to_string()))?.path();
        let is_cert = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext == "pem" || ext.bytes().all(|b| b.is_ascii_digit()));
        if !is_cert || !path.is_file() {
            continue;
        }
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        match Certificate::from_pem(&bytes) {
            Ok(cert) => certs.push(cert),
            Err(e) => tracing::trace!(path = %path.display(), error = %e, "skipping CA file"),
        }
    }
    tracing::debug!(count = certs.len(), dir = %dir.display(), "loaded CA certificates");
    Ok(certs)
}

fn method(verb: Verb) -> Method {
    match verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Put => Method::PUT,
        Verb::Delete => Method::DELETE,
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
        source = inner.source();
    }

    classify_detail(detail, error.is_connect(), error.is_timeout())
}

/// Certificate verification failures are checked before handshake
/// failures since rustls reports both through the handshake.
fn classify_detail(detail: String, is_connect: bool, is_timeout: bool) -> TransportError {
    const CERTIFICATE_MARKERS: &[&str] = &[
        "certificate",
        "unknownissuer",
        "unknown issuer",
        "verif",
        "expired",
    ];

    let lower = detail.to_lowercase();
    if is_connect && is_timeout {
        TransportError::ConnectTimeout(detail)
    } else if CERTIFICATE_MARKERS.iter().any(|m| lower.contains(m)) {
        TransportError::Certificate(detail)
    } else if lower.contains("handshake") || lower.contains("tls") {
        TransportError::Tls(detail)
    } else if is_timeout {
        TransportError::Timeout(detail)
    } else {
        TransportError::Connection(detail)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(method(request.verb), &request.url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = builder.send().map_err(classify)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().map_err(classify)?.to_vec();

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

/// Connects real HTTPS transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, tls: &TlsSettings) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(HttpTransport::new(tls)?))
    }
}
