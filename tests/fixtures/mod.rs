//! Shared fixtures for the integration tests
//!
//! - a demo task configuration the mock server accepts
//! - `TestGrid`: a scratch directory with grid paths, a scripted runner and
//!   a mock REST server wired together

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crab_client::config::ConfigValue;
use crab_client::credential::CommandRunner;
use crab_client::mock::{MockConnector, MockTransport, ScriptedRunner};
use crab_client::{
    ClientConfig, ClientEnvironment, SubmitError, SubmitOptions, SubmitOutcome, Submitter,
    TaskConfiguration,
};
use crab_params::ParamType;
use crab_protocol::ServerInstance;
use tempfile::TempDir;

/// A Monte Carlo task the mock server accepts.
pub const DEMO_CONFIG: &str = r#"
[General]
requestName = "demo"

[JobType]
pluginName = "PrivateMC"

[Data]
splitting = "EventBased"
unitsPerJob = 10
totalUnits = 100

[Site]
storageSite = "T2_TEST_SITE"
"#;

pub fn demo_config() -> TaskConfiguration {
    TaskConfiguration::from_toml_str(DEMO_CONFIG).expect("demo config parses")
}

/// A value of the given registry type.
pub fn sample_value(kind: ParamType) -> ConfigValue {
    match kind {
        ParamType::String => ConfigValue::Str("sample".into()),
        ParamType::Int => ConfigValue::Int(7),
        ParamType::Bool => ConfigValue::Bool(true),
        ParamType::List => ConfigValue::List(vec![
            ConfigValue::Str("a".into()),
            ConfigValue::Str("b".into()),
        ]),
        ParamType::Dict => {
            let mut dict = BTreeMap::new();
            dict.insert("GPUMemoryMB".to_string(), ConfigValue::Int(8000));
            ConfigValue::Dict(dict)
        }
    }
}

/// Scratch grid environment plus a mock server for the production instance.
pub struct TestGrid {
    pub dir: TempDir,
    pub env: ClientEnvironment,
    pub client_config: ClientConfig,
    pub runner: ScriptedRunner,
    pub connector: MockConnector,
}

impl TestGrid {
    /// A user with a valid proxy and delegation.
    pub fn new() -> Self {
        Self::with_runner(ScriptedRunner::grid_ready())
    }

    pub fn with_runner(runner: ScriptedRunner) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let env = grid_environment(dir.path());
        fs::write(&env.proxy_path, "proxy").expect("write proxy");
        fs::write(&env.user_cert, "cert").expect("write cert");
        fs::write(&env.user_key, "key").expect("write key");

        let client_config = ClientConfig {
            retry_base_seconds: 0,
            retry_jitter_seconds: 0,
            wait_poll_seconds: 1,
            wait_max_polls: 2,
            ..ClientConfig::default()
        };
        let instance = ServerInstance::resolve("prod", None, None).expect("prod instance");
        let transport = Arc::new(MockTransport::crab_server(&instance));

        Self {
            dir,
            env,
            client_config,
            runner,
            connector: MockConnector::new(transport),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn transport(&self) -> &Arc<MockTransport> {
        self.connector.transport()
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        &self.runner
    }

    pub fn submit(
        &self,
        config: TaskConfiguration,
        options: SubmitOptions,
    ) -> Result<SubmitOutcome, SubmitError> {
        Submitter::new(&self.client_config, &self.env, &self.runner, &self.connector)
            .submit(config, self.path(), options)
    }
}

/// Grid paths inside `root`.
pub fn grid_environment(root: &Path) -> ClientEnvironment {
    ClientEnvironment {
        user_cert: root.join("usercert.pem"),
        user_key: root.join("userkey.pem"),
        proxy_path: root.join("x509up_u1000"),
        cert_dir: root.to_path_buf(),
        framework_base: None,
        framework_version: Some("CMSSW_13_0_0".into()),
        architecture: Some("el8_amd64_gcc11".into()),
    }
}
