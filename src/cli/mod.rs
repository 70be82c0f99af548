pub mod account;
pub mod inspect;
pub mod keys;

use clap::{Parser, Subcommand};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "compass-account")]
#[command(about = "Compass programmable account tooling", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "compass.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Key generation and address derivation
    Keys {
        #[command(subcommand)]
        cmd: keys::KeysCommands,
    },
    /// Decode and hash wire formats offline
    Inspect {
        #[command(subcommand)]
        cmd: inspect::InspectCommands,
    },
    /// Stored account state
    Account {
        #[command(subcommand)]
        cmd: account::AccountCommands,
    },
}

/// Parse hex with or without a `0x` prefix.
pub(crate) fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    hex::decode(input.trim().trim_start_matches("0x")).map_err(|e| format!("invalid hex: {}", e))
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
