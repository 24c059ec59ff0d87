//! rund — the Run daemon.
//!
//! Single binary that assembles the execution pipeline:
//! - State store (redb)
//! - Sandbox engine + module cache
//! - Instance manager
//! - Metrics collector
//! - HTTP gateway
//!
//! It also carries offline admin commands that operate directly on the
//! store file, for bootstrapping endpoints and deployments.
//!
//! # Usage
//!
//! ```text
//! rund serve --config /etc/run/run.toml
//! rund endpoint create --name hello --runtime go
//! rund deploy --endpoint <id> --wasm hello.wasm --activate
//! ```

mod admin;
mod serve;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use run_core::{RunConfig, RuntimeKind};
use run_state::StateStore;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_LOG_FILTER: &str = "info,rund=debug,run=debug";

#[derive(Parser)]
#[command(name = "rund", about = "Run serverless daemon", version, propagate_version = true)]
struct Cli {
    /// Path to run.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory; the store is kept at `<data-dir>/run.redb`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP gateway.
    Serve {
        /// Listen address, overriding `[server] addr`.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Manage endpoints.
    Endpoint {
        #[command(subcommand)]
        action: EndpointAction,
    },
    /// Upload a module as a new deployment of an endpoint.
    Deploy {
        #[arg(long)]
        endpoint: Uuid,
        /// Path to the compiled `.wasm` module.
        #[arg(long)]
        wasm: PathBuf,
        /// Deployment environment, `KEY=VALUE`. Repeatable.
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Make the new deployment the endpoint's live deployment.
        #[arg(long)]
        activate: bool,
    },
    /// Point an endpoint's live traffic at a deployment (publish or rollback).
    Promote {
        #[arg(long)]
        endpoint: Uuid,
        #[arg(long)]
        deployment: Uuid,
    },
    /// Print stored guest log lines.
    Logs {
        /// A single request's log.
        #[arg(long, conflicts_with = "deployment", required_unless_present = "deployment")]
        request: Option<Uuid>,
        /// Every request log of a deployment.
        #[arg(long)]
        deployment: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum EndpointAction {
    /// Create an endpoint.
    Create {
        #[arg(long)]
        name: String,
        /// Guest runtime: go, python, or rust.
        #[arg(long)]
        runtime: RuntimeKind,
        /// Default environment, `KEY=VALUE`. Repeatable.
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },
    /// List endpoints.
    List,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_FILTER)?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(path: Option<&Path>, data_dir: Option<&Path>) -> anyhow::Result<RunConfig> {
    let mut config = match path {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.state.path = dir.join("run.redb");
    }
    Ok(config)
}

fn open_store(config: &RunConfig) -> anyhow::Result<StateStore> {
    let path = &config.state.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    StateStore::open(path).with_context(|| format!("failed to open state store at {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut config = load_config(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                config.server.addr = addr;
            }
            serve::run(config, store).await
        }
        Command::Endpoint { action } => {
            let output = match action {
                EndpointAction::Create { name, runtime, env } => {
                    admin::create_endpoint(&store, &name, runtime, env.into_iter().collect())?
                }
                EndpointAction::List => admin::list_endpoints(&store)?,
            };
            println!("{output}");
            Ok(())
        }
        Command::Deploy {
            endpoint,
            wasm,
            env,
            activate,
        } => {
            let artifact = std::fs::read(&wasm)
                .with_context(|| format!("failed to read module {}", wasm.display()))?;
            let env: HashMap<_, _> = env.into_iter().collect();
            println!("{}", admin::deploy(&store, endpoint, &artifact, env, activate)?);
            Ok(())
        }
        Command::Promote {
            endpoint,
            deployment,
        } => {
            println!("{}", admin::promote(&store, endpoint, deployment)?);
            Ok(())
        }
        Command::Logs {
            request,
            deployment,
        } => {
            let output = match (request, deployment) {
                (Some(request), _) => admin::request_log(&store, request)?,
                (None, Some(deployment)) => admin::deployment_logs(&store, deployment)?,
                (None, None) => anyhow::bail!("either --request or --deployment is required"),
            };
            println!("{output}");
            Ok(())
        }
    }
}
