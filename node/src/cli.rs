//! # CLI Interface
//!
//! `clap` derive definitions for `helix-node`. Four subcommands: `run`,
//! `keygen`, `status`, and `version`. Most flags fall back to a `HELIX_*`
//! environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// Helix ledger node.
///
/// Accepts transactions over HTTP, batches them into RNA templates, and
/// finalizes blocks once validators carrying a quorum of weight have sealed
/// them with Neo Seal.
#[derive(Parser, Debug)]
#[command(name = "helix-node", version, propagate_version = true)]
pub struct HelixNodeCli {
    /// Log output format.
    #[arg(long, global = true, env = "HELIX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Generate a validator key: a seed file and a public system file.
    Keygen(KeygenArgs),
    /// Print the status of a running node.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON config file. Defaults apply when omitted.
    #[arg(long, short = 'c', env = "HELIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the sled ledger database. Created if missing.
    #[arg(long, short = 'd', env = "HELIX_DATA_DIR", default_value = "helix-data")]
    pub data_dir: PathBuf,

    /// Keep the ledger in memory. Nothing survives a restart.
    #[arg(long)]
    pub ephemeral: bool,

    /// HTTP API listen address.
    #[arg(long, env = "HELIX_API_ADDR", default_value = "127.0.0.1:9741")]
    pub api_addr: SocketAddr,

    /// Run the in-process devnet validators and batching loop.
    #[arg(long, env = "HELIX_DEVNET")]
    pub devnet: bool,

    /// Seed file of a validator key this node attests with.
    #[arg(long, env = "HELIX_VALIDATOR_SEED")]
    pub validator_seed: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Output path prefix. Writes `<out>.seed` and `<out>.pub`.
    #[arg(long, short = 'o', default_value = "validator")]
    pub out: PathBuf,

    /// Derive from this seed text instead of OS randomness. Test keys only.
    #[arg(long)]
    pub seed: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API address of the running node.
    #[arg(long, env = "HELIX_API_ADDR", default_value = "127.0.0.1:9741")]
    pub api_addr: SocketAddr,
}
