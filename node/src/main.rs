// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Helix Node
//!
//! Entry point for the `helix-node` binary. Parses CLI arguments, sets up
//! logging and metrics, opens the ledger, starts the background tasks, and
//! serves the HTTP API.
//!
//! Subcommands:
//!
//! - `run`: start the node
//! - `keygen`: write a validator seed file and public system file
//! - `status`: print a running node's `/status`
//! - `version`: print build version information

mod api;
mod cli;
mod config;
mod devnet;
mod logging;
mod metrics;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;

use helix_protocol::consensus::{Validator, ValidatorSet};
use helix_protocol::crypto::mq::{derive_keypair, PublicSystem};
use helix_protocol::storage::{BlockStore, LedgerDb, MemoryStore};
use helix_protocol::Ledger;

use cli::{Commands, HelixNodeCli};
use config::NodeConfig;
use metrics::NodeMetrics;
use state::AppState;

/// Name the batcher signs templates with.
const PROPOSER_NAME: &str = "helix-node";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HelixNodeCli::parse();

    match cli.command {
        Commands::Run(args) => {
            logging::init_logging(logging::DEFAULT_FILTER, cli.log_format);
            run_node(args).await
        }
        Commands::Keygen(args) => {
            logging::init_logging("helix_node=info", cli.log_format);
            keygen(args)
        }
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the ledger, starts validators and the batcher, and serves the API
/// until a shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let config = NodeConfig::load(args.config.as_deref())?;

    tracing::info!(
        api_addr = %args.api_addr,
        devnet = args.devnet,
        ephemeral = args.ephemeral,
        "starting helix-node"
    );

    // --- Storage ---
    let store: Arc<dyn BlockStore> = if args.ephemeral {
        tracing::warn!("ephemeral ledger: nothing will survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        let db_path = args.data_dir.join("ledger");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create {}", db_path.display()))?;
        let db = LedgerDb::open(&db_path)
            .with_context(|| format!("failed to open ledger at {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), "ledger opened");
        Arc::new(db)
    };

    // --- Validators ---
    let mut local: Vec<Arc<Validator>> = Vec::new();
    if args.devnet {
        tracing::info!(count = config.devnet.validators, "deriving devnet validator keys");
        local.extend(
            devnet::devnet_validators(config.devnet.validators)
                .into_iter()
                .map(Arc::new),
        );
    }
    if let Some(path) = &args.validator_seed {
        let seed = read_seed(path)?;
        local.push(Arc::new(Validator::from_seed("local", &seed)));
    }

    let mut systems: Vec<Arc<PublicSystem>> =
        local.iter().map(|v| Arc::clone(v.public_system())).collect();
    for path in &config.remote_validators {
        systems.push(Arc::new(read_public_system(path)?));
    }
    if systems.is_empty() {
        bail!("no validators: pass --devnet or --validator-seed, or list remote_validators in the config");
    }
    let validator_set = ValidatorSet::from_public_systems(systems);
    tracing::info!(
        validators = validator_set.len(),
        local = local.len(),
        quorum = %config.finality.threshold,
        "validator set ready"
    );

    // --- Ledger ---
    let ledger = Ledger::new(store, validator_set, config.finality.clone(), config.pool.clone())
        .context("failed to start ledger")?;
    let height = ledger
        .verify_chain()
        .context("stored chain failed integrity check")?;
    tracing::info!(height, "stored chain verified");

    // --- State, tasks, API ---
    let metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let state = AppState::new(
        format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), helix_protocol::config::PROTOCOL_VERSION),
        Arc::new(ledger),
        metrics,
    );

    let mut tasks: Vec<_> = local
        .iter()
        .map(|v| devnet::spawn_validator(state.clone(), Arc::clone(v)))
        .collect();
    tasks.push(devnet::spawn_batcher(
        state.clone(),
        PROPOSER_NAME.to_string(),
        config.devnet.clone(),
    ));

    let router = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(args.api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", args.api_addr))?;
    tracing::info!("API listening on {}", args.api_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    for task in tasks {
        task.abort();
    }
    state
        .ledger
        .engine()
        .store()
        .flush()
        .context("failed to flush ledger")?;
    tracing::info!("helix-node stopped");
    Ok(())
}

/// Writes `<out>.seed` (hex, owner-only) and `<out>.pub` (the serialized
/// public system) and prints the validator id.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    let seed = match &args.seed {
        Some(text) => text.as_bytes().to_vec(),
        None => {
            let mut seed = vec![0u8; 32];
            OsRng.fill_bytes(&mut seed);
            seed
        }
    };

    tracing::info!("deriving Neo Seal key pair");
    let keypair = derive_keypair(&seed);

    if let Some(dir) = args.out.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let seed_path = with_suffix(&args.out, "seed");
    let pub_path = with_suffix(&args.out, "pub");

    std::fs::write(&seed_path, hex::encode(&seed))
        .with_context(|| format!("failed to write {}", seed_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&seed_path, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::write(&pub_path, keypair.public_system().to_bytes())
        .with_context(|| format!("failed to write {}", pub_path.display()))?;

    println!("Validator key generated.");
    println!("  Validator id   : {}", keypair.fingerprint());
    println!("  Seed file      : {}", seed_path.display());
    println!("  Public system  : {}", pub_path.display());
    Ok(())
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_seed(path: &Path) -> Result<Vec<u8>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    hex::decode(raw.trim()).with_context(|| format!("seed file {} is not hex", path.display()))
}

fn read_public_system(path: &Path) -> Result<PublicSystem> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read public system {}", path.display()))?;
    PublicSystem::from_bytes(&bytes)
        .with_context(|| format!("invalid public system {}", path.display()))
}

/// Fetches `/status` with a bare HTTP/1.1 request and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let mut stream = tokio::net::TcpStream::connect(args.api_addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.api_addr))?;

    let request = format!(
        "GET /status HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.api_addr
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or(&response);

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}

fn print_version() {
    println!("helix-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", helix_protocol::config::PROTOCOL_VERSION);
    println!("mq params  {}", helix_protocol::config::MQ_PARAMETER_SET);
}

/// Resolves on Ctrl+C or SIGTERM. A handler that fails to install never
/// resolves, so the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
