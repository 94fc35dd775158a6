//! directord user CLI
//!
//! Compiles orchestrations and one-shot execs, submits them over the local
//! control socket, and exposes cluster management operations.
//!
//! Exit codes: 0 success, 1 user-facing error, 2 invalid input.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use dird_cli::control::ControlClient;
use dird_cli::output::{
    format_analysis, format_job_info, format_jobs, format_nodes, print_error, print_info,
};
use dird_components::{
    compile_exec, compile_orchestrations, parse_orchestrations, CompileOptions, ComponentError,
    Registry,
};
use dird_core::config::{self, Config};
use dird_core::rpc::{ControlRequest, ControlResponse};

const EXIT_FAILURE: i32 = 1;
const EXIT_INVALID_INPUT: i32 = 2;

#[derive(Parser)]
#[command(name = "dird")]
#[command(author, version, about = "directord distributed task execution")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// UNIX socket path for local RPC (overrides config)
    #[arg(long, global = true)]
    socket_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server daemon in the foreground
    Server {
        /// Extra arguments passed to dird-server
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run the client daemon in the foreground
    Client {
        /// Extra arguments passed to dird-client
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Submit a one-shot component execution
    Exec {
        /// Component verb (RUN, ARG, COPY, ...)
        #[arg(long)]
        verb: String,

        /// The execution string, parsed like an orchestration entry
        #[arg(required = true)]
        exec: Vec<String>,

        /// Target identities (repeatable)
        #[arg(short, long)]
        target: Vec<String>,

        /// Template variables, KEY=VALUE (repeatable)
        #[arg(long)]
        var: Vec<String>,

        /// Bypass the client-side cache
        #[arg(long)]
        ignore_cache: bool,

        /// Wait for completion and report the outcome
        #[arg(long)]
        wait: bool,

        /// Seconds to wait with --wait
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Submit orchestration files
    Orchestrate {
        /// Orchestration YAML files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target identities, overriding stanza targets (repeatable)
        #[arg(short, long)]
        target: Vec<String>,

        /// Restrict execution to these identities (repeatable)
        #[arg(long)]
        restrict: Vec<String>,

        /// Template variables, KEY=VALUE (repeatable)
        #[arg(long)]
        var: Vec<String>,

        /// Bypass the client-side cache
        #[arg(long)]
        ignore_cache: bool,

        /// Wait for every submitted job and report outcomes
        #[arg(long)]
        wait: bool,

        /// Seconds to wait per job with --wait
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Cluster management operations
    Manage {
        #[command(flatten)]
        action: ManageAction,
    },
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct ManageAction {
    /// List known nodes
    #[arg(long)]
    list_nodes: bool,

    /// List tracked jobs
    #[arg(long)]
    list_jobs: bool,

    /// Show one job in full
    #[arg(long, value_name = "ID")]
    job_info: Option<Uuid>,

    /// Write all tracked jobs to a JSON file on the server host
    #[arg(long, value_name = "PATH")]
    export_jobs: Option<String>,

    /// Profile one job
    #[arg(long, value_name = "ID")]
    analyze_job: Option<Uuid>,

    /// Profile an orchestration
    #[arg(long, value_name = "ID")]
    analyze_parent: Option<Uuid>,

    /// Drop all tracked jobs
    #[arg(long)]
    purge_jobs: bool,

    /// Drop all node records
    #[arg(long)]
    purge_nodes: bool,

    /// Generate driver key material
    #[arg(long)]
    generate_keys: bool,

    /// Launch the read-only dashboard
    #[arg(long)]
    run_ui: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(socket_path) = cli.socket_path {
        config.socket_path = socket_path;
    }
    let client = ControlClient::new(config.socket_path.clone());

    match cli.command {
        Commands::Server { args } => run_daemon("dird-server", &args, cli.config.as_deref()),
        Commands::Client { args } => run_daemon("dird-client", &args, cli.config.as_deref()),

        Commands::Exec {
            verb,
            exec,
            target,
            var,
            ignore_cache,
            wait,
            timeout,
        } => {
            let options = CompileOptions {
                targets: target,
                restrict: Vec::new(),
                ignore_cache,
                vars: parse_vars(&var)?,
            };
            let registry = Registry::builtin();
            let spec = match compile_exec(&registry, &verb, &exec.join(" "), &options) {
                Ok(spec) => spec,
                Err(e) => invalid_input(e),
            };

            let job_ids = client.submit(vec![spec]).await?;
            for job_id in &job_ids {
                print_info(&format!("Job received. Task ID: {}", job_id));
            }
            if wait {
                wait_for_jobs(&client, &job_ids, timeout).await?;
            }
            Ok(())
        }

        Commands::Orchestrate {
            files,
            target,
            restrict,
            var,
            ignore_cache,
            wait,
            timeout,
        } => {
            let options = CompileOptions {
                targets: target,
                restrict,
                ignore_cache,
                vars: parse_vars(&var)?,
            };
            let registry = Registry::builtin();

            let mut jobs = Vec::new();
            for file in &files {
                let content = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {:?}", file))?;
                let orchestrations = match parse_orchestrations(&content) {
                    Ok(orchestrations) => orchestrations,
                    Err(e) => invalid_input(e),
                };
                match compile_orchestrations(&registry, &orchestrations, &options) {
                    Ok(mut compiled) => jobs.append(&mut compiled),
                    Err(e) => invalid_input(e),
                }
            }

            let job_ids = client.submit(jobs).await?;
            print_info(&format!("Submitted {} job(s)", job_ids.len()));
            for job_id in &job_ids {
                print_info(&format!("Job received. Task ID: {}", job_id));
            }
            if wait {
                wait_for_jobs(&client, &job_ids, timeout).await?;
            }
            Ok(())
        }

        Commands::Manage { action } => run_manage(&client, action).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                Ok(config::load_config(&default_path).unwrap_or_default())
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Exec/orchestrate parse failures are invalid input, not runtime errors
fn invalid_input(error: ComponentError) -> ! {
    print_error(&error.to_string());
    std::process::exit(EXIT_INVALID_INPUT);
}

fn parse_vars(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut vars = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            print_error(&format!("--var expects KEY=VALUE, got {:?}", pair));
            std::process::exit(EXIT_INVALID_INPUT);
        };
        vars.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(vars)
}

async fn wait_for_jobs(client: &ControlClient, job_ids: &[Uuid], timeout: u64) -> Result<()> {
    let mut failed = false;
    for job_id in job_ids {
        let status = client
            .poll_job(*job_id, Duration::from_secs(timeout))
            .await?;
        let ok = status.success.unwrap_or(false);
        if ok {
            print_info(&format!("{}: {}", job_id, status.info));
        } else {
            failed = true;
            print_error(&format!("{}: {}", job_id, status.info));
        }
    }
    if failed {
        std::process::exit(EXIT_FAILURE);
    }
    Ok(())
}

async fn run_manage(client: &ControlClient, action: ManageAction) -> Result<()> {
    let request = if action.list_nodes {
        ControlRequest::ListNodes
    } else if action.list_jobs {
        ControlRequest::ListJobs
    } else if let Some(job_id) = action.job_info {
        ControlRequest::JobInfo { job_id }
    } else if let Some(path) = action.export_jobs {
        ControlRequest::ExportJobs { path }
    } else if let Some(job_id) = action.analyze_job {
        ControlRequest::AnalyzeJob { job_id }
    } else if let Some(parent_id) = action.analyze_parent {
        ControlRequest::AnalyzeParent { parent_id }
    } else if action.purge_jobs {
        ControlRequest::PurgeJobs
    } else if action.purge_nodes {
        ControlRequest::PurgeNodes
    } else if action.generate_keys {
        ControlRequest::GenerateKeys
    } else if action.run_ui {
        ControlRequest::RunUi
    } else {
        unreachable!("clap enforces exactly one manage action");
    };

    match client.request(&request).await? {
        ControlResponse::Nodes { nodes } => println!("{}", format_nodes(&nodes)),
        ControlResponse::Jobs { jobs } => println!("{}", format_jobs(&jobs)),
        ControlResponse::Job { job } => println!("{}", format_job_info(&job)),
        ControlResponse::Analysis(report) => println!("{}", format_analysis(&report)),
        ControlResponse::Exported { path, count } => {
            print_info(&format!("Exported {} job(s) to {}", count, path));
        }
        ControlResponse::Purged { count } => {
            print_info(&format!("Purged {} record(s)", count));
        }
        ControlResponse::Ok => print_info("OK"),
        ControlResponse::Error { message } => {
            print_error(&message);
            std::process::exit(EXIT_FAILURE);
        }
        other => {
            print_error(&format!("Unexpected response: {:?}", other));
            std::process::exit(EXIT_FAILURE);
        }
    }
    Ok(())
}

/// Exec into a daemon binary, passing the shared --config through
fn run_daemon(binary: &str, args: &[String], config: Option<&std::path::Path>) -> Result<()> {
    use std::process::Command;

    let mut cmd = Command::new(binary);
    if let Some(path) = config {
        cmd.arg("--config").arg(path);
    }
    cmd.args(args);

    let status = cmd
        .status()
        .with_context(|| format!("Failed to launch {}", binary))?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(EXIT_FAILURE));
    }
    Ok(())
}
