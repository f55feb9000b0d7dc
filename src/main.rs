//! CRAB client CLI
//!
//! Entry point for the `crab` command-line tool.

use clap::{ArgAction, Parser, Subcommand};
use crab_client::config::{ClientConfig, TaskConfiguration, DEFAULT_CONFIG_FILE};
use crab_client::credential::{CredentialManager, SystemRunner};
use crab_client::environment::ClientEnvironment;
use crab_client::failure::{Classify, ExitCode, FailureKind};
use crab_client::logging::{LogContext, Verbosity, LOG_FILE_NAME};
use crab_client::submit::{self, SubmitOptions, Submitter};
use crab_client::task::{ResubmitOptions, TaskSession};
use crab_client::transport::{connect_client, HttpConnector, TlsSettings};
use crab_client::{mapping, signal};
use crab_protocol::endpoint::{resource, subresource};
use crab_protocol::{DelegateDnInfo, RequestParams, ServerInstance, TaskStatus};
use std::backtrace::Backtrace;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "crab")]
#[command(about = "Submit and manage CRAB grid tasks", version)]
struct Cli {
    /// More console output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only warnings and errors on the console
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Server instance when the task configuration names none
    #[arg(long, global = true)]
    instance: Option<String>,

    /// Retry count for server requests (at least 2 are always made)
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// What to do with a valid proxy carrying other VO attributes
    /// (overwrite, keep, fail)
    #[arg(long, global = true)]
    proxy_mismatch: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a task
    Submit {
        /// Task configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Wait until the task leaves the submission states
        #[arg(long)]
        wait: bool,

        /// Stop once the server accepts the task; no jobs run
        #[arg(long)]
        dryrun: bool,

        /// With --dryrun, do not wait for the task to be uploaded
        #[arg(long)]
        skip_estimates: bool,

        /// Section.Param=value overrides
        overrides: Vec<String>,
    },

    /// Show the status of a task
    Status {
        /// Task directory
        #[arg(short, long)]
        dir: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Kill every job of a task
    Kill {
        /// Task directory
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Resubmit failed jobs of a task
    Resubmit {
        /// Task directory
        #[arg(short, long)]
        dir: PathBuf,

        /// Job ids and ranges, e.g. 1,4-6
        #[arg(long)]
        jobids: Option<String>,

        #[arg(long)]
        maxmemory: Option<u64>,

        #[arg(long)]
        maxjobruntime: Option<u64>,

        #[arg(long)]
        numcores: Option<u64>,

        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i64>,

        /// Comma-separated sites
        #[arg(long, value_delimiter = ',')]
        sitewhitelist: Vec<String>,

        /// Comma-separated sites
        #[arg(long, value_delimiter = ',')]
        siteblacklist: Vec<String>,
    },

    /// Make the local proxy and the delegated credential ready
    Proxy {
        #[arg(long, default_value = "")]
        vo_group: String,

        #[arg(long, default_value = "")]
        vo_role: String,
    },

    /// Validate a task configuration without contacting the server
    Validate {
        /// Task configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Section.Param=value overrides
        overrides: Vec<String>,
    },
}

impl Commands {
    /// Task commands log into their task directory.
    fn log_path(&self) -> PathBuf {
        match self {
            Commands::Status { dir, .. } | Commands::Kill { dir } | Commands::Resubmit { dir, .. } => {
                dir.join(LOG_FILE_NAME)
            }
            _ => PathBuf::from(LOG_FILE_NAME),
        }
    }
}

/// A command failure, reduced to what the user sees and what is logged.
struct CommandFailure {
    kind: FailureKind,
    message: String,
    detail: String,
}

impl<E: Classify + std::error::Error> From<E> for CommandFailure {
    fn from(error: E) -> Self {
        Self {
            kind: error.failure_kind(),
            message: error.to_string(),
            detail: format!("{:?}", error),
        }
    }
}

impl CommandFailure {
    fn unexpected(message: impl Display) -> Self {
        Self {
            kind: FailureKind::Unexpected,
            message: message.to_string(),
            detail: message.to_string(),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log = match LogContext::init(
        &cli.command.log_path(),
        Verbosity::from_flags(cli.verbose, cli.quiet),
    ) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Cannot open the log file: {}", e);
            process::exit(ExitCode::Unexpected.as_i32());
        }
    };

    if let Err(e) = signal::install(log.file()) {
        error!("cannot install the interrupt handler: {}", e);
    }
    let panic_log = log.file();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = panic_log.append_line(&format!(
            "PANIC: {}\n{}",
            panic,
            Backtrace::force_capture()
        ));
    }));

    let code = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(&cli, &log))) {
        Ok(Ok(())) => ExitCode::Success,
        Ok(Err(failure)) => report(&failure),
        Err(_) => report(&CommandFailure::unexpected("internal error (panic)")),
    };

    println!("{}", log.location_message());
    process::exit(code.as_i32());
}

fn report(failure: &CommandFailure) -> ExitCode {
    if failure.kind == FailureKind::Unexpected {
        error!(detail = %failure.detail, "unexpected failure");
        eprintln!("{}: {}", failure.kind, failure.message);
        eprintln!("Please report this and attach the log file.");
    } else {
        tracing::debug!(detail = %failure.detail, "command failed");
        eprintln!("{}: {}", failure.kind, failure.message);
    }
    failure.kind.exit_code()
}

fn run(cli: &Cli, log: &LogContext) -> Result<(), CommandFailure> {
    let client_config = load_client_config(cli)?;

    if let Commands::Validate { config, overrides } = &cli.command {
        let mut task_config = load_task_config(config, overrides)?;
        if !task_config.contains("General.requestName") {
            task_config.set("General.requestName", submit::default_request_name())?;
        }
        mapping::validate(&task_config, &current_dir()?).into_result()?;
        println!("{} is valid", config.display());
        return Ok(());
    }

    let env = ClientEnvironment::from_env()?;

    match &cli.command {
        Commands::Submit {
            config,
            wait,
            dryrun,
            skip_estimates,
            overrides,
        } => {
            let task_config = load_task_config(config, overrides)?;
            let options = SubmitOptions {
                dry_run: *dryrun,
                skip_estimates: *skip_estimates,
                wait: *wait,
            };
            let outcome = Submitter::new(&client_config, &env, &SystemRunner, &HttpConnector)
                .with_log(log)
                .submit(task_config, &current_dir()?, options)?;

            println!("Task name: {}", outcome.request_name);
            println!("Project dir: {}", outcome.task_dir.display());
            if let Some(status) = &outcome.status {
                print_status(&outcome.request_name, status);
            }
            Ok(())
        }

        Commands::Status { dir, json } => {
            let session = TaskSession::open(dir, &HttpConnector, &env, &client_config)?;
            let status = session.status()?;
            if *json {
                let text = serde_json::to_string_pretty(&status)
                    .map_err(CommandFailure::unexpected)?;
                println!("{}", text);
            } else {
                print_status(&session.record().request_name, &status);
            }
            Ok(())
        }

        Commands::Kill { dir } => {
            let session = TaskSession::open(dir, &HttpConnector, &env, &client_config)?;
            session.kill()?;
            println!("Kill request sent for {}", session.record().request_name);
            Ok(())
        }

        Commands::Resubmit {
            dir,
            jobids,
            maxmemory,
            maxjobruntime,
            numcores,
            priority,
            sitewhitelist,
            siteblacklist,
        } => {
            let options = ResubmitOptions {
                jobids: jobids.clone(),
                max_memory_mb: *maxmemory,
                max_job_runtime_min: *maxjobruntime,
                num_cores: *numcores,
                priority: *priority,
                site_whitelist: sitewhitelist.clone(),
                site_blacklist: siteblacklist.clone(),
            };
            let mut session = TaskSession::open(dir, &HttpConnector, &env, &client_config)?;
            session.resubmit(&options)?;
            println!("Resubmit request sent for {}", session.record().request_name);
            Ok(())
        }

        Commands::Proxy { vo_group, vo_role } => {
            run_proxy(&client_config, &env, vo_group, vo_role)
        }

        Commands::Validate { .. } => Ok(()),
    }
}

fn run_proxy(
    client_config: &ClientConfig,
    env: &ClientEnvironment,
    group: &str,
    role: &str,
) -> Result<(), CommandFailure> {
    let credentials = CredentialManager::new(&SystemRunner, env)
        .with_proxy_validity_hours(client_config.proxy_validity_hours);
    let proxy = credentials.ensure_local_proxy(
        client_config.proxy_min_time_left_seconds,
        group,
        role,
        client_config.mismatch_policy,
    )?;

    let instance = ServerInstance::resolve(
        &client_config.instance,
        client_config.rest_host.as_deref(),
        client_config.db_instance.as_deref(),
    )?;
    let tls = TlsSettings::for_environment(env, client_config.request_timeout());
    let client = connect_client(&HttpConnector, &tls, instance, client_config.retry_policy())?;
    let dns: DelegateDnInfo = client
        .get(
            resource::INFO,
            &RequestParams::new().with("subresource", subresource::DELEGATE_DN),
        )?
        .first()?;

    let delegation = credentials.delegate_to_remote_store(
        &proxy,
        &client_config.myproxy_server,
        &dns.retriever_pattern(),
        client_config.myproxy_validity_minutes(),
        client_config.myproxy_renew_threshold_days,
    )?;
    info!("delegated credential {} ready", delegation.name);

    let summary = serde_json::json!({ "proxy": proxy, "delegation": delegation });
    let text = serde_json::to_string_pretty(&summary).map_err(CommandFailure::unexpected)?;
    println!("{}", text);
    Ok(())
}

fn load_client_config(cli: &Cli) -> Result<ClientConfig, CommandFailure> {
    let mut overrides = toml::Table::new();
    if let Some(instance) = &cli.instance {
        overrides.insert("instance".into(), toml::Value::String(instance.clone()));
    }
    if let Some(retries) = cli.retries {
        overrides.insert("retries".into(), toml::Value::Integer(i64::from(retries)));
    }
    if let Some(policy) = &cli.proxy_mismatch {
        overrides.insert("mismatch_policy".into(), toml::Value::String(policy.clone()));
    }
    Ok(ClientConfig::load(Some(overrides))?)
}

fn load_task_config(path: &Path, overrides: &[String]) -> Result<TaskConfiguration, CommandFailure> {
    let mut config = TaskConfiguration::load(path)?;
    for spec in overrides {
        config.apply_override(spec)?;
    }
    Ok(config)
}

fn current_dir() -> Result<PathBuf, CommandFailure> {
    std::env::current_dir().map_err(CommandFailure::unexpected)
}

fn print_status(name: &str, status: &TaskStatus) {
    println!("Task: {}", name);
    println!("Status: {}", status.status);
    if let Some(message) = &status.failure_message {
        println!("Failure: {}", message);
    }
    for warning in &status.warnings {
        println!("Warning: {}", warning);
    }
    if !status.jobs_per_status.is_empty() {
        let total = status.total_jobs();
        println!("Jobs ({}):", total);
        for (state, count) in &status.jobs_per_status {
            let share = if total > 0 {
                *count as f64 * 100.0 / total as f64
            } else {
                0.0
            };
            println!("  {:<12} {:>6} ({:.1}%)", state, count, share);
        }
    }
}
