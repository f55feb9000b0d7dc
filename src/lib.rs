//! CRAB client - grid task submission
//!
//! Validates a task configuration, makes X.509 credentials ready, packages
//! the user's code into a sandbox and submits the task to the CRAB REST
//! server, then follows it with status, kill and resubmit.
//!
//! Modules, bottom-up:
//! - `config`, `environment`: task and client configuration, grid paths
//! - `credential`: local proxy and delegated credential
//! - `transport`: HTTPS with client certificates and retries
//! - `mapping`, `jobtype`: validation and translation to server parameters
//! - `sandbox`: canonical archive and cache upload
//! - `submit`, `task`, `cache`: the commands and their persisted record

pub mod cache;
pub mod config;
pub mod credential;
pub mod environment;
pub mod failure;
pub mod jobtype;
pub mod logging;
pub mod mapping;
pub mod mock;
pub mod sandbox;
pub mod signal;
pub mod submit;
pub mod task;
pub mod transport;

pub use cache::{CacheError, TaskCacheRecord};
pub use config::{ClientConfig, TaskConfiguration};
pub use environment::ClientEnvironment;
pub use failure::{Classify, ExitCode, FailureKind};
pub use submit::{SubmitError, SubmitOptions, SubmitOutcome, Submitter};
