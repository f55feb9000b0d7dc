//! Scripted stand-in for the grid command-line tools.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::credential::{CommandRunner, CredentialError, ToolCommand, ToolOutput};

/// Default DN of the scripted user.
pub const MOCK_USER_DN: &str = "/DC=ch/DC=cern/OU=Users/CN=jdoe/CN=123456/CN=Jane Doe";

#[derive(Debug)]
struct Script {
    program: String,
    /// Only matches commands carrying this argument.
    selector: Option<String>,
    outputs: VecDeque<ToolOutput>,
}

impl Script {
    fn matches(&self, command: &ToolCommand) -> bool {
        self.program == command.program
            && self
                .selector
                .as_deref()
                .map_or(true, |flag| command.has_arg(flag))
    }

    fn next(&mut self) -> ToolOutput {
        if self.outputs.len() > 1 {
            self.outputs.pop_front().unwrap_or_default()
        } else {
            self.outputs.front().cloned().unwrap_or_default()
        }
    }
}

/// Replays canned tool outputs and records every invocation.
///
/// Outputs are queued per program (optionally narrowed to commands carrying
/// a given argument); the last one repeats. Unscripted programs behave as
/// if not installed.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<Vec<Script>>,
    creates: Mutex<Vec<(String, PathBuf)>>,
    invocations: Mutex<Vec<ToolCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, program: &str, selector: Option<&str>, output: ToolOutput) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        match scripts
            .iter_mut()
            .find(|s| s.program == program && s.selector.as_deref() == selector)
        {
            Some(script) => script.outputs.push_back(output),
            None => scripts.push(Script {
                program: program.to_string(),
                selector: selector.map(str::to_string),
                outputs: VecDeque::from([output]),
            }),
        }
    }

    /// Queue an output for every invocation of `program`.
    pub fn script(&self, program: &str, output: ToolOutput) -> &Self {
        self.push(program, None, output);
        self
    }

    /// Queue an output for invocations of `program` carrying `arg`.
    pub fn script_with_arg(&self, program: &str, arg: &str, output: ToolOutput) -> &Self {
        self.push(program, Some(arg), output);
        self
    }

    /// Write an empty file at `path` whenever `program` succeeds.
    pub fn creates_file(&self, program: &str, path: impl Into<PathBuf>) -> &Self {
        self.creates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((program.to_string(), path.into()));
        self
    }

    /// Queue `voms-proxy-info` answers describing one proxy.
    pub fn proxy_info(&self, time_left: u64, dn: &str, fqan: &str) -> &Self {
        self.script_with_arg("voms-proxy-info", "--timeleft", ToolOutput::ok(format!("{}\n", time_left)))
            .script_with_arg("voms-proxy-info", "--identity", ToolOutput::ok(format!("{}/CN=987654\n", dn)))
            .script_with_arg("voms-proxy-info", "--fqan", ToolOutput::ok(format!("{}\n", fqan)))
    }

    /// Queue an `openssl x509 -enddate` answer.
    pub fn certificate_expiring(&self, when: DateTime<Utc>) -> &Self {
        self.script(
            "openssl",
            ToolOutput::ok(format!("notAfter={}\n", when.format("%b %e %H:%M:%S %Y GMT"))),
        )
    }

    /// Queue a `myproxy-info` answer.
    pub fn myproxy_time_left(&self, seconds: u64) -> &Self {
        let output = if seconds == 0 {
            ToolOutput::failed(1, "no credentials found for user")
        } else {
            ToolOutput::ok(format!(
                "username: x\nowner: {}\n  timeleft: {}:{:02}:{:02}  ({:.1} days)\n",
                MOCK_USER_DN,
                seconds / 3600,
                seconds % 3600 / 60,
                seconds % 60,
                seconds as f64 / 86400.0
            ))
        };
        self.script("myproxy-info", output)
    }

    /// A user with a valid proxy and a long-lived delegation: no tool needs
    /// to create anything.
    pub fn grid_ready() -> Self {
        let runner = Self::new();
        runner
            .proxy_info(600_000, MOCK_USER_DN, "/cms/Role=NULL/Capability=NULL")
            .myproxy_time_left(30 * 86400);
        runner
    }

    /// Every invocation so far.
    pub fn invocations(&self) -> Vec<ToolCommand> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Invocations of `program`.
    pub fn calls_to(&self, program: &str) -> Vec<ToolCommand> {
        self.invocations()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, CredentialError> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.clone());

        let output = {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            let script = scripts
                .iter_mut()
                .filter(|s| s.matches(command))
                .max_by_key(|s| s.selector.is_some());
            match script {
                Some(script) => script.next(),
                None => {
                    return Err(CredentialError::ToolUnavailable {
                        program: command.program.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "not scripted",
                        ),
                    })
                }
            }
        };

        if output.success() {
            for (program, path) in self.creates.lock().unwrap_or_else(|e| e.into_inner()).iter() {
                if *program == command.program {
                    let _ = fs::write(path, b"");
                }
            }
        }
        Ok(output)
    }
}
