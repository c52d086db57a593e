//! # Node Configuration
//!
//! Optional JSON file for the settings that do not fit on a command line.
//! Every field has a default, so `{}` is a valid config and so is no file.
//!
//! ```json
//! {
//!   "finality": { "threshold": { "numerator": 2, "denominator": 3 },
//!                 "candidate_timeout_ms": 30000 },
//!   "pool": { "max_size": 50000, "max_per_sender": 1000 },
//!   "devnet": { "validators": 4, "batch_interval_ms": 2000, "template_batch": 512 },
//!   "remote_validators": ["keys/eu-west.pub"]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use helix_protocol::config::{
    DEFAULT_BATCH_INTERVAL, DEFAULT_DEVNET_VALIDATORS, DEFAULT_TEMPLATE_BATCH,
    MAX_TEMPLATE_TRANSACTIONS,
};
use helix_protocol::consensus::FinalityConfig;
use helix_protocol::transaction::PoolConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub finality: FinalityConfig,
    pub pool: PoolConfig,
    pub devnet: DevnetConfig,
    /// Public system files (written by `helix-node keygen`) of validators
    /// that run elsewhere and submit attestations over the API.
    pub remote_validators: Vec<PathBuf>,
}

/// In-process validators and the batching loop that feeds them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevnetConfig {
    /// Number of validators derived from the devnet seed prefix.
    pub validators: usize,
    pub batch_interval_ms: u64,
    /// Cap on transactions per template.
    pub template_batch: usize,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            validators: DEFAULT_DEVNET_VALIDATORS,
            batch_interval_ms: DEFAULT_BATCH_INTERVAL.as_millis() as u64,
            template_batch: DEFAULT_TEMPLATE_BATCH,
        }
    }
}

impl DevnetConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

impl NodeConfig {
    /// Reads `path`, or returns the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.devnet.batch_interval_ms > 0,
            "devnet.batch_interval_ms must be positive"
        );
        ensure!(
            (1..=MAX_TEMPLATE_TRANSACTIONS).contains(&self.devnet.template_batch),
            "devnet.template_batch must be between 1 and {MAX_TEMPLATE_TRANSACTIONS}"
        );
        ensure!(self.pool.max_size > 0, "pool.max_size must be positive");
        Ok(())
    }
}
