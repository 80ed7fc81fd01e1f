//! `azurited` stdin command definition and handling.

use clap::Parser;

use azurite_consensus_rules::{PowHasher, RingSignatureVerifier};
use azurite_core::Core;
use azurite_database::Database;

/// A command received from stdin.
#[derive(Debug, Parser)]
#[command(
    multicall = true,
    subcommand_required = true,
    rename_all = "snake_case",
    help_template = "{all-args}",
    arg_required_else_help = true,
    disable_help_flag = true
)]
pub enum Command {
    /// Print status information on the node.
    Status,

    /// Pop blocks from the top of the blockchain.
    PopBlocks { count: u32 },

    /// Run the periodic maintenance pass now.
    Sweep,

    Exit,
}

pub fn parse(line: &str) -> Result<Command, String> {
    Command::try_parse_from(line.split_whitespace()).map_err(|e| e.to_string())
}

pub fn dispatch<D: Database, P: PowHasher, R: RingSignatureVerifier>(
    command: Command,
    core: &mut Core<D, P, R>,
) {
    match command {
        Command::Status => match status(core) {
            Ok(status) => println!("{status}"),
            Err(e) => eprintln!("status failed: {e}"),
        },
        Command::PopBlocks { count } => match core.pop_blocks(count) {
            Ok(new_top) => println!("new top block index: {new_top}"),
            Err(e) => eprintln!("pop failed: {e}"),
        },
        Command::Sweep => {
            if let Err(e) = core.on_idle() {
                eprintln!("sweep failed: {e}");
            }
        }
        Command::Exit => unreachable!("exit is handled by the caller"),
    }
}

fn status<D: Database, P: PowHasher, R: RingSignatureVerifier>(
    core: &Core<D, P, R>,
) -> Result<String, azurite_core::CoreError> {
    let cache = core.cache();
    let top = cache.top_block_index()?;
    let hash = cache.top_block_hash()?;
    let info = cache.block_info(top)?;

    Ok(format!(
        "height: {top}\n\
         top hash: {hash}\n\
         cumulative difficulty: {}\n\
         generated coins: {}\n\
         transactions: {}\n\
         pool: {}",
        info.cumulative_difficulty,
        info.already_generated_coins,
        cache.transactions_count()?,
        core.pool().len(),
    ))
}
