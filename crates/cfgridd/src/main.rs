//! cfgridd: the cfgrid daemon.
//!
//! One binary per replica. Each replica:
//! - Opens the shared store (redb), or connects to the replica that owns it
//! - Loads its initial configuration snapshot
//! - Publishes its status to the blackboard
//! - Follows configuration broadcasts from other replicas
//! - Serves the REST API, including rollout requests
//!
//! # Usage
//!
//! ```text
//! cfgridd run --config /etc/cfgrid/cfgrid.toml --port 8080
//! cfgridd run --config /etc/cfgrid/cfgrid.toml --store-remote 10.0.0.5:8070
//! cfgridd store --config /etc/cfgrid/cfgrid.toml --port 8070
//! cfgridd print-config --config /etc/cfgrid/cfgrid.toml
//! ```

mod replica;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cfgrid_core::CfgridConfig;

const DEFAULT_FILTER: &str = "info,cfgridd=debug,cfgrid=debug";

#[derive(Parser)]
#[command(name = "cfgridd", about = "cfgrid configuration rollout daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a replica: serve configuration and coordinate rollouts.
    Run {
        /// Path to cfgrid.toml. Defaults apply when the file is missing.
        #[arg(long, default_value = "/etc/cfgrid/cfgrid.toml")]
        config: PathBuf,

        /// Port to listen on (overrides `node.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Shared store path (overrides `store.path`).
        #[arg(long)]
        store_path: Option<PathBuf>,

        /// Address of the replica owning the shared store (overrides `store.remote`).
        #[arg(long)]
        store_remote: Option<String>,
    },
    /// Own the shared store and serve it to replicas, without serving config.
    Store {
        #[arg(long, default_value = "/etc/cfgrid/cfgrid.toml")]
        config: PathBuf,

        /// Port to listen on (overrides `node.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Shared store path (overrides `store.path`).
        #[arg(long)]
        store_path: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    PrintConfig {
        #[arg(long, default_value = "/etc/cfgrid/cfgrid.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            port,
            store_path,
            store_remote,
        } => {
            let mut config = load_config(&config)?;
            if let Some(port) = port {
                config.node.port = port;
            }
            if let Some(path) = store_path {
                config.store.path = path;
            }
            if store_remote.is_some() {
                config.store.remote = store_remote;
            }
            replica::run(config).await
        }
        Command::Store {
            config,
            port,
            store_path,
        } => {
            let mut config = load_config(&config)?;
            if let Some(port) = port {
                config.node.port = port;
            }
            if let Some(path) = store_path {
                config.store.path = path;
            }
            replica::run_store(config).await
        }
        Command::PrintConfig { config } => {
            let config = load_config(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<CfgridConfig> {
    if !path.exists() {
        warn!(path = ?path, "config file not found, using defaults");
        return Ok(CfgridConfig::default());
    }
    let config = CfgridConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(path = ?path, "configuration loaded");
    Ok(config)
}
