//! The Azurite node binary: bring the core up, then serve stdin
//! commands until told to exit.

mod commands;

use std::{io::BufRead, process::ExitCode, sync::Arc};

use clap::Parser;

use azurite_consensus_rules::{CurrencyBuilder, RingVerifier};
use azurite_core::{CheckpointEntry, Checkpoints, Config, Core};
use azurite_database::RedbDatabase;
use azurite_types::hash_bytes;

use commands::Command;

/// Command-line arguments; anything set here overrides the config
/// file.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory for the persistent store.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Run against the test network.
    #[arg(long)]
    testnet: bool,

    /// Extra checkpoint as INDEX:HASH; repeatable.
    #[arg(long = "add-checkpoint", value_name = "INDEX:HASH")]
    add_checkpoint: Vec<CheckpointEntry>,

    /// Path to a TOML config file.
    #[arg(long)]
    config_file: Option<std::path::PathBuf>,

    /// Log level filter, e.g. `info` or `azurite_core=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<Config, String> {
    let mut config = match &args.config_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            toml::from_str(&raw).map_err(|e| format!("bad config file: {e}"))?
        }
        None => Config::default(),
    };

    if let Some(data_dir) = &args.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    config.testnet |= args.testnet;
    config.checkpoints.extend(args.add_checkpoint.iter().cloned());
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let config = load_config(args)?;

    let currency = Arc::new(CurrencyBuilder::new().testnet(config.testnet).build());
    tracing::info!(
        testnet = config.testnet,
        genesis = %currency.genesis_block().hash(),
        "starting azurited"
    );

    let mut checkpoints = Checkpoints::new();
    for entry in &config.checkpoints {
        checkpoints
            .add(entry.index, entry.hash)
            .map_err(|existing| {
                format!(
                    "checkpoint at {} conflicts with configured hash {existing}",
                    entry.index
                )
            })?;
    }

    let db = RedbDatabase::open(&config.store_path())
        .map_err(|e| format!("failed to open the store: {e}"))?;

    // The content hash stands in for the memory-hard function; the
    // proof-of-work seam is where a deployment plugs its own in.
    let pow = |blob: &[u8]| hash_bytes(blob).0;

    let mut core = Core::new(currency, db, pow, RingVerifier, checkpoints)
        .map_err(|e| format!("failed to open the core: {e}"))?;

    let top = core
        .cache()
        .top_block_index()
        .map_err(|e| e.to_string())?;
    tracing::info!(top, "core is up");

    // Serve commands from stdin until `exit`.
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| e.to_string())?;
        match commands::parse(&line) {
            Ok(Command::Exit) => break,
            Ok(command) => commands::dispatch(command, &mut core),
            Err(e) => eprintln!("{e}"),
        }
    }

    tracing::info!("shutting down");
    Ok(())
}
