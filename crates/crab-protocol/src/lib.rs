//! CRAB REST wire types.
//!
//! Request parameter encoding, endpoint layout, the `{"result": [...]}`
//! response envelope and the structured `X-Error-*` headers the server
//! attaches to failures.

pub mod encoding;
pub mod endpoint;
pub mod envelope;
pub mod info;
pub mod lumi;
pub mod workflow;

pub use encoding::{encode_params, RequestParams, SubmissionRequest, WireValue};
pub use endpoint::{InstanceError, ServerInstance, Verb};
pub use envelope::{decode_first, first_result, results, EnvelopeError, ServerErrorHeaders};
pub use info::{BackendUrls, DelegateDnInfo, ServerVersion};
pub use lumi::{LumiError, LumiMask};
pub use workflow::{SubmitResult, TaskStatus};

/// Client version reported to the server.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
