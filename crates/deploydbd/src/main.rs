//! deploydbd — the deploydb operator binary.
//!
//! Wires the deployment store, vault, drivers, and orchestrator together:
//! - State store (redb, `<data_dir>/deploydb.redb`)
//! - Vault (key from `[vault] key` or `DEPLOYDB_VAULT_KEY`)
//! - Drivers (embedded-file always; mysql/postgres when Docker answers)
//! - Orchestrator + worker pool
//!
//! # Usage
//!
//! ```text
//! deploydbd --config /etc/deploydb/deploydb.toml create --engine postgres --name orders
//! deploydbd status <id>
//! deploydbd teardown <id>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deploydb_core::{DaemonConfig, Engine, EngineConfig, ServerConfig};
use deploydb_driver::{ContainerRuntime, DockerRuntime};
use deploydb_engine::{CreateDeployment, DriverSet, Orchestrator};
use deploydb_state::StateStore;
use deploydb_vault::Vault;

const DEFAULT_LOG_FILTER: &str = "info,deploydb=debug";

#[derive(Parser)]
#[command(name = "deploydbd", about = "Database provisioning daemon")]
struct Cli {
    /// Path to deploydb.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Process log format (written to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create a deployment and wait until it settles.
    Create {
        #[arg(long)]
        engine: Engine,

        #[arg(long)]
        name: String,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long, default_value = "local")]
        mode: String,

        #[arg(long)]
        db_name: Option<String>,

        #[arg(long)]
        db_user: Option<String>,

        #[arg(long)]
        db_password: Option<String>,

        #[arg(long)]
        db_root_password: Option<String>,
    },

    /// Show status, log, and connection details of a deployment.
    Status { id: String },

    /// List deployments.
    List {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Tear down a running deployment and wait until it is deleted.
    Teardown { id: String },

    /// Fail interrupted deployments and re-run pending ones.
    Recover,

    /// Print a fresh vault key.
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    config.apply_env();

    match cli.command {
        Command::Keygen => {
            println!("{}", deploydb_vault::generate_key());
            Ok(())
        }
        Command::Status { id } => {
            let orch = open(&config, false).await?;
            print_json(&orch.status(&id)?)
        }
        Command::List { owner } => {
            let orch = open(&config, false).await?;
            for d in orch.list(owner.as_deref())? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    d.id,
                    d.name,
                    d.engine,
                    d.status,
                    d.owner.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Command::Create {
            engine,
            name,
            owner,
            mode,
            db_name,
            db_user,
            db_password,
            db_root_password,
        } => {
            let orch = open(&config, true).await?;
            orch.recover_interrupted()?;

            let mut request = CreateDeployment::new(name, engine).mode(mode);
            if let Some(owner) = owner {
                request = request.owner(owner);
            }
            if engine.is_containerized() {
                request = request.config(EngineConfig::Server(ServerConfig {
                    db_name,
                    db_user,
                    db_password,
                    db_root_password,
                }));
            }
            let id = orch.create_deployment(request)?;
            info!(deployment_id = %id, "deployment created");

            settle(&orch).await;
            print_json(&orch.status(&id)?)
        }
        Command::Teardown { id } => {
            let orch = open(&config, true).await?;
            orch.recover_interrupted()?;
            orch.request_teardown(&id)?;

            settle(&orch).await;
            print_json(&orch.status(&id)?)
        }
        Command::Recover => {
            let orch = open(&config, true).await?;
            let report = orch.recover_interrupted()?;
            settle(&orch).await;
            print_json(&report)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Assemble the orchestrator. The container runtime is only contacted when
/// the command may run drivers.
async fn open(config: &DaemonConfig, with_runtime: bool) -> anyhow::Result<Orchestrator> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let store = StateStore::open(&config.db_path())?;
    info!(path = %config.db_path().display(), "deployment store opened");

    let vault = Vault::from_config(config.vault_key())?;

    let runtime: Option<Arc<dyn ContainerRuntime>> = if with_runtime {
        match DockerRuntime::connect().await {
            Ok(docker) => Some(Arc::new(docker)),
            Err(e) => {
                warn!(error = %e, "container runtime unavailable");
                None
            }
        }
    } else {
        None
    };

    let drivers = DriverSet::from_config(config, runtime);
    Ok(Orchestrator::from_config(config, store, vault, drivers))
}

/// Wait for queued work, or for Ctrl-C; then shut the pool down gracefully.
async fn settle(orch: &Orchestrator) {
    tokio::select! {
        _ = orch.wait_idle() => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("interrupt received; finishing accepted work"),
                Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
            }
        }
    }
    orch.shutdown().await;
    info!(stats = ?orch.stats(), "orchestrator stopped");
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
