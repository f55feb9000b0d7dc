//! Server instances and REST endpoint layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// REST application prefix on every host.
pub const APP_PREFIX: &str = "crabserver";

/// Resource names under an instance.
pub mod resource {
    pub const WORKFLOW: &str = "workflow";
    pub const INFO: &str = "info";
}

/// Values of the `subresource` parameter.
pub mod subresource {
    pub const DELEGATE_DN: &str = "delegatedn";
    pub const BACKEND_URLS: &str = "backendurls";
    pub const VERSION: &str = "version";
    pub const RESUBMIT: &str = "resubmit2";
}

/// HTTP verbs used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }

    /// Whether parameters travel in the query string rather than the body.
    pub fn uses_query(&self) -> bool {
        matches!(self, Verb::Get | Verb::Delete)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("unknown instance '{0}' (expected prod, preprod, dev or other)")]
    Unknown(String),

    #[error("instance 'other' needs both General.restHost and General.dbInstance")]
    IncompleteOther,

    #[error("invalid REST host '{0}'")]
    InvalidHost(String),
}

/// A resolved REST server: host, optional port and database instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    /// Name the user selected (`prod`, `preprod`, `dev`, `other`).
    pub name: String,
    pub rest_host: String,
    pub port: Option<u16>,
    pub db_instance: String,
}

const KNOWN_INSTANCES: &[(&str, &str, &str)] = &[
    ("prod", "cmsweb.cern.ch", "prod"),
    ("preprod", "cmsweb-testbed.cern.ch", "preprod"),
    ("dev", "cmsweb-test2.cern.ch", "dev"),
];

impl ServerInstance {
    /// Resolve an instance name.
    ///
    /// Explicit `rest_host` / `db_instance` override the named instance's
    /// values; `other` requires both.
    pub fn resolve(
        name: &str,
        rest_host: Option<&str>,
        db_instance: Option<&str>,
    ) -> Result<Self, InstanceError> {
        let (default_host, default_db) = match KNOWN_INSTANCES.iter().find(|(n, _, _)| *n == name)
        {
            Some((_, host, db)) => (Some(*host), Some(*db)),
            None if name == "other" => (None, None),
            None => return Err(InstanceError::Unknown(name.to_string())),
        };

        let host = rest_host
            .or(default_host)
            .ok_or(InstanceError::IncompleteOther)?;
        let db = db_instance
            .or(default_db)
            .ok_or(InstanceError::IncompleteOther)?;

        let (host, port) = split_host_port(host)?;
        Ok(Self {
            name: name.to_string(),
            rest_host: host,
            port,
            db_instance: db.to_string(),
        })
    }

    /// `host` or `host:port`.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.rest_host, port),
            None => self.rest_host.clone(),
        }
    }

    /// `https://<authority>`.
    pub fn base_url(&self) -> String {
        format!("https://{}", self.authority())
    }

    /// Path of a resource: `/crabserver/<db>/<resource>`.
    pub fn resource_path(&self, resource: &str) -> String {
        format!("/{}/{}/{}", APP_PREFIX, self.db_instance, resource)
    }

    /// Full URL of a resource.
    pub fn resource_url(&self, resource: &str) -> String {
        format!("{}{}", self.base_url(), self.resource_path(resource))
    }
}

fn split_host_port(value: &str) -> Result<(String, Option<u16>), InstanceError> {
    let trimmed = value
        .trim_start_matches("https://")
        .trim_end_matches('/');
    let parsed = url::Url::parse(&format!("https://{}", trimmed))
        .map_err(|_| InstanceError::InvalidHost(value.to_string()))?;
    if parsed.path() != "/" {
        return Err(InstanceError::InvalidHost(value.to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| InstanceError::InvalidHost(value.to_string()))?;
    Ok((host.to_string(), parsed.port()))
}
