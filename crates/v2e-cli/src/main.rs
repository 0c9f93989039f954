//! `v2e-cli` entry point: a thin wrapper over the orchestration core. Most
//! logic lives in the library crates; this file parses arguments, opens the
//! store, and wires a demo fleet.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use v2e_fsm::{BaseProvider, MacroFsm, ProviderConfig};
use v2e_provider::ProviderTemplate;
use v2e_store::Store;
use v2e_testkit::{demo_template_config, MockExternalStore};

#[derive(Parser)]
#[command(name = "v2e")]
#[command(about = "Hierarchical ingestion orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store inspection commands
    Store {
        #[command(subcommand)]
        cmd: StoreCmd,
    },

    /// Provider inspection commands
    Provider {
        #[command(subcommand)]
        cmd: ProviderCmd,
    },

    /// Start a demo fleet and run until Ctrl-C drains it
    Run {
        #[arg(long, env = "V2E_DB_PATH", default_value = "session.db")]
        db: PathBuf,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Config inspection commands
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum StoreCmd {
    /// Opens the store and prints its provider count
    Status {
        #[arg(long, env = "V2E_DB_PATH", default_value = "session.db")]
        db: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProviderCmd {
    /// Lists every persisted provider record
    List {
        #[arg(long, env = "V2E_DB_PATH", default_value = "session.db")]
        db: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Computes the layered config hash and prints canonical JSON
    Hash {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Store { cmd } => match cmd {
            StoreCmd::Status { db } => {
                let store = Store::open(db.clone()).await.context("open store")?;
                let providers = store.list_provider_states().await?;
                println!("db_path={}", db.display());
                println!("provider_count={}", providers.len());
            }
        },

        Commands::Provider { cmd } => match cmd {
            ProviderCmd::List { db } => {
                let store = Store::open(db).await.context("open store")?;
                for record in store.list_provider_states().await? {
                    println!(
                        "{}\t{}\t{:?}\tprocessed={}\terrors={}",
                        record.id,
                        record.r#type,
                        record.state,
                        record.processed_count,
                        record.error_count
                    );
                }
            }
        },

        Commands::Run { db, config_paths } => run_demo_fleet(db, config_paths).await?,

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Hash { paths } => {
                let loaded = v2e_config::load_layered_yaml(&paths)?;
                println!("config_hash={}", loaded.config_hash);
                println!("{}", loaded.canonical_json);
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Wires a small demo fleet of `MockExternalStore`-backed providers (real
/// feed adapters are out of scope, per spec.md §1) and runs until Ctrl-C
/// drains the M-FSM.
async fn run_demo_fleet(db: PathBuf, config_paths: Vec<String>) -> Result<()> {
    let store = Store::open(db).await.context("open store")?;

    let config_json = if config_paths.is_empty() {
        serde_json::Value::Null
    } else {
        v2e_config::load_layered_yaml(&config_paths)?.config_json
    };

    let fsm = MacroFsm::new("fleet", Some(store.clone()))
        .await
        .context("construct macro fsm")?;

    for (id, r#type) in [("nvd", "cve"), ("cisa", "kev")] {
        let tuning = v2e_config::provider_tuning(&config_json, id);

        let mut provider_config = ProviderConfig::new(id, r#type).with_store(store.clone());
        provider_config.batch_size = tuning.batch_size;
        provider_config.max_retries = tuning.max_retries;
        provider_config.retry_delay = std::time::Duration::from_millis(tuning.retry_delay_ms);

        let provider = BaseProvider::new(provider_config)
            .await
            .with_context(|| format!("construct provider '{id}'"))?;

        let external = Arc::new(MockExternalStore::new());
        let mut template_config = demo_template_config(external);
        template_config.batch_size = tuning.batch_size;
        template_config.checkpoint_interval = tuning.checkpoint_interval;
        template_config.failure_threshold = tuning.failure_threshold;
        ProviderTemplate::new(&provider, template_config).await;

        fsm.add_provider(provider)
            .await
            .with_context(|| format!("register provider '{id}'"))?;
    }

    fsm.spawn_event_loop();
    fsm.start_all_providers_in_order().await?;
    tracing::info!("v2e fleet running, press Ctrl-C to drain and stop");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    fsm.stop().await.context("drain fleet")?;
    tracing::info!("fleet drained");
    Ok(())
}
