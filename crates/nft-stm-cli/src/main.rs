//! stmctl: operator tool for NFT state machine configurations.
//!
//! # Usage
//!
//! ```bash
//! # Validate a configuration
//! stmctl --config config/stm_example.yaml check
//!
//! # What may an editor set in setup_nft?
//! stmctl allowed --state setup_nft --roles editor
//!
//! # Run a fresh entity through an update sequence
//! stmctl simulate --roles creator --update 'name="Sunrise"' --update 'price=10'
//!
//! # Reload on every change until Ctrl-C
//! stmctl watch
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nft_stm::{
    Actor, ConfigWatcher, Nft, NftUpdate, NftView, ServiceSettings, SharedEngine, StmEngine,
};

#[derive(Parser)]
#[command(name = "stmctl")]
#[command(version)]
#[command(about = "Validate and exercise NFT state machine configurations")]
struct Cli {
    /// State machine configuration file (defaults to $STM_CONFIG_FILE, then
    /// config/stm_example.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration
    Check,

    /// Print the attributes the given roles may set in a state
    Allowed {
        #[arg(long)]
        state: String,

        /// Comma separated role labels
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },

    /// Apply updates to a fresh entity and print where it ends up
    Simulate {
        /// Comma separated role labels of the acting user
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,

        /// `attribute=JSON` to set, or a bare `attribute` to clear
        #[arg(long = "update", short = 'u')]
        updates: Vec<String>,
    },

    /// Watch the configuration and reload on change until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli
        .config
        .unwrap_or_else(|| ServiceSettings::from_env().config_file);

    let result = match cli.command {
        Commands::Check => cmd_check(&config),
        Commands::Allowed { state, roles } => cmd_allowed(&config, &state, roles),
        Commands::Simulate { roles, updates } => cmd_simulate(&config, roles, &updates),
        Commands::Watch => cmd_watch(config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_engine(path: &Path) -> Result<StmEngine> {
    StmEngine::from_file(path).with_context(|| format!("invalid configuration {}", path.display()))
}

fn cmd_check(path: &Path) -> Result<ExitCode> {
    let engine = load_engine(path)?;
    println!(
        "{}: OK ({} attributes, {} states, initial state '{}')",
        path.display(),
        engine.attributes().len(),
        engine.graph().len(),
        engine.initial_state()
    );
    for state in engine.graph().names() {
        let def = engine.graph().definition_of(state)?;
        let targets: Vec<&str> = def.transitions.iter().map(|t| t.next_state.as_str()).collect();
        println!("  {} -> [{}]", state, targets.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_allowed(path: &Path, state: &str, roles: Vec<String>) -> Result<ExitCode> {
    let engine = load_engine(path)?;
    let actor = Actor::new(0, roles);
    let sample = Nft::new(0, 0, state);
    let allowed = engine.get_allowed_actions(&actor, &sample)?;
    println!("{}", serde_json::to_string_pretty(&allowed)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_simulate(path: &Path, roles: Vec<String>, raw_updates: &[String]) -> Result<ExitCode> {
    let engine = load_engine(path)?;
    let actor = Actor::new(1, roles);
    let mut nft = Nft::new(1, actor.id, engine.initial_state());
    let updates: Vec<NftUpdate> = raw_updates.iter().map(|u| parse_update(u)).collect();

    match engine.apply_updates(&actor, &mut nft, &updates) {
        Ok(moved) => {
            info!(moved, state = %nft.state, "Simulation finished");
            let allowed_actions = engine.get_allowed_actions(&actor, &nft)?;
            let view = NftView {
                nft,
                allowed_actions,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let output = serde_json::json!({
                "error": e.kind().as_str(),
                "message": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_watch(path: PathBuf) -> Result<ExitCode> {
    let shared = Arc::new(
        SharedEngine::from_path(&path)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
    );
    let _watcher = ConfigWatcher::spawn(shared.clone())?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!(generation = shared.generation(), "Stopping watcher");
    Ok(ExitCode::SUCCESS)
}

fn parse_update(raw: &str) -> NftUpdate {
    match raw.split_once('=') {
        Some((attribute, value)) => NftUpdate::set(attribute.trim(), value.trim()),
        None => NftUpdate::clear(raw.trim()),
    }
}
