//! Sandbox cache upload.

use serde::Deserialize;
use tracing::{debug, info};

use super::{SandboxArchive, SandboxError};
use crate::transport::{RestClient, RestError};

/// Cache resource receiving archives.
pub const CACHE_FILE_RESOURCE: &str = "file";

const PAYLOAD_TOO_LARGE: u16 = 413;

/// Where an archive was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxUpload {
    /// Opaque key returned by the cache.
    pub key: String,
    pub cache_url: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    #[serde(default)]
    hashkey: Option<String>,
}

/// PUT `archive` to `<cache_url>/file?hashkey=<sha256>`.
///
/// Archives larger than `limit` are refused before any request is made. A
/// server HTTP 413 gives the same error, carrying the limit the server
/// reports in `X-Error-Info` when that is a number.
pub fn upload(
    client: &RestClient,
    cache_url: &str,
    archive: &SandboxArchive,
    limit: u64,
) -> Result<SandboxUpload, SandboxError> {
    let size = archive.size();
    if limit > 0 && size > limit {
        return Err(SandboxError::TooBig { size, limit });
    }

    let cache_url = cache_url.trim_end_matches('/');
    let url = format!(
        "{}/{}?hashkey={}",
        cache_url, CACHE_FILE_RESOURCE, archive.sha256
    );
    debug!(%url, size, "uploading sandbox");

    let response = match client.upload(&url, archive.bytes.clone()) {
        Ok(response) => response,
        Err(error) if error.status() == Some(PAYLOAD_TOO_LARGE) => {
            return Err(SandboxError::TooBig {
                size,
                limit: server_limit(&error).unwrap_or(limit),
            });
        }
        Err(error) => return Err(SandboxError::Upload(error)),
    };

    let key = response
        .first::<UploadResult>()
        .ok()
        .and_then(|r| r.hashkey)
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| archive.sha256.clone());
    info!("sandbox uploaded to {} as {}", cache_url, key);

    Ok(SandboxUpload {
        key,
        cache_url: cache_url.to_string(),
        size,
    })
}

fn server_limit(error: &RestError) -> Option<u64> {
    error
        .server_headers()?
        .info
        .as_deref()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{Classify, FailureKind};
    use crate::mock::{FailureConfig, MockTransport, MOCK_CACHE_URL};
    use crate::sandbox::SandboxBuilder;
    use crate::transport::RetryPolicy;
    use crab_protocol::{ServerInstance, Verb};
    use std::sync::Arc;

    fn archive() -> SandboxArchive {
        let mut builder = SandboxBuilder::new();
        builder.add_bytes("payload.txt", b"payload".to_vec());
        builder.build().unwrap()
    }

    fn client(transport: Arc<MockTransport>) -> RestClient {
        let instance = ServerInstance::resolve("prod", None, None).unwrap();
        RestClient::with_policy(transport, instance, RetryPolicy::immediate(2))
    }

    fn server() -> Arc<MockTransport> {
        let instance = ServerInstance::resolve("prod", None, None).unwrap();
        Arc::new(MockTransport::crab_server(&instance))
    }

    #[test]
    fn test_upload_uses_hash_key() {
        let transport = server();
        let archive = archive();
        let uploaded = upload(&client(transport.clone()), MOCK_CACHE_URL, &archive, 0).unwrap();

        assert_eq!(uploaded.key, "uploaded");
        assert_eq!(uploaded.size, archive.size());
        let puts = transport.requests_to(Verb::Put, "/crabcache/file");
        assert_eq!(puts.len(), 1);
        assert!(puts[0].url.ends_with(&format!("hashkey={}", archive.sha256)));
        assert_eq!(puts[0].body.as_deref(), Some(archive.bytes.as_slice()));
    }

    #[test]
    fn test_local_limit_skips_request() {
        let transport = server();
        let archive = archive();
        let err = upload(&client(transport.clone()), MOCK_CACHE_URL, &archive, 10).unwrap_err();
        assert!(matches!(err, SandboxError::TooBig { limit: 10, .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_server_413_is_too_big() {
        let transport = server();
        transport.inject(
            Verb::Put,
            "/crabcache/file",
            FailureConfig::status(413).with_header("X-Error-Info", "1024"),
        );
        let archive = archive();
        let err = upload(&client(transport), MOCK_CACHE_URL, &archive, 0).unwrap_err();
        match &err {
            SandboxError::TooBig { size, limit } => {
                assert_eq!(*size, archive.size());
                assert_eq!(*limit, 1024);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(err.failure_kind(), FailureKind::SandboxTooBig);
    }

    #[test]
    fn test_other_failures_are_rest_errors() {
        let transport = server();
        transport.inject(Verb::Put, "/crabcache/file", FailureConfig::status(500));
        let err = upload(&client(transport), MOCK_CACHE_URL, &archive(), 0).unwrap_err();
        assert!(matches!(err, SandboxError::Upload(_)));
        assert_eq!(err.failure_kind(), FailureKind::RestCommunication);
    }
}
