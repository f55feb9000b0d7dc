//! Mock REST server and grid tools
//!
//! In-process stand-ins so unit and integration tests can drive the whole
//! submission pipeline without network access or grid middleware.
//!
//! - `MockTransport`: scripted REST routes with failure injection
//! - `MockConnector`: hands the mock transport to code expecting a connector
//! - `ScriptedRunner`: canned `voms-proxy-*`, `myproxy-*` and `openssl` output

mod failure;
mod runner;
mod server;

pub use failure::{FailureConfig, FailureInjector};
pub use runner::{ScriptedRunner, MOCK_USER_DN};
pub use server::{
    envelope, MockConnector, MockTransport, MOCK_CACHE_URL, MOCK_REQUEST_NAME, MOCK_REST_DN,
};
