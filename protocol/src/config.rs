//! # Protocol Configuration & Constants
//!
//! Every magic number in Helix lives here. Hash contexts, MQ parameters,
//! domain tags, limits, and the defaults the engine and pool start from.
//!
//! The hash contexts and domain tags are consensus-critical: changing any of
//! them changes every digest on the chain. Treat them as frozen once a chain
//! exists. The limits and defaults below them are operational knobs.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Protocol family name, used in logs and the node's `/status` output.
pub const PROTOCOL_NAME: &str = "helix";

// ---------------------------------------------------------------------------
// Quadrit Hash
// ---------------------------------------------------------------------------

/// BLAKE3 `derive_key` context for the Quadrit hash. Every ledger digest
/// (transaction, template, block, key fingerprint) goes through it.
pub const QUADRIT_HASH_CONTEXT: &str = "helix-ledger 2026-01-01 quadrit hash v1";

/// Digest length in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// Digest length in quadrits (four per byte).
pub const DIGEST_QUADRITS: usize = DIGEST_LENGTH * 4;

/// Digest length in GF(16) elements (two per byte).
pub const DIGEST_NIBBLES: usize = DIGEST_LENGTH * 2;

// ---------------------------------------------------------------------------
// Neo Seal (UOV over GF(16))
// ---------------------------------------------------------------------------

/// Name of the MQ parameter set, written into serialized public systems.
pub const MQ_PARAMETER_SET: &str = "uov-Is";

/// Reduction polynomial of GF(16): x^4 + x + 1.
pub const GF16_MODULUS: u8 = 0b1_0011;

/// Vinegar variables (v).
pub const MQ_VINEGAR_VARS: usize = 96;

/// Oil variables (o). Also the dimension of the linear system solved per
/// signing attempt.
pub const MQ_OIL_VARS: usize = 64;

/// Total variables (n = v + o). Also the length of a seal's solution vector.
pub const MQ_VARIABLES: usize = MQ_VINEGAR_VARS + MQ_OIL_VARS;

/// Quadratic equations (m). Must equal the digest length in GF(16)
/// elements: the target of each equation is one nibble of the digest.
pub const MQ_EQUATIONS: usize = 64;

/// Coefficients in one upper-triangular n x n equation.
pub const MQ_COEFFS_PER_EQUATION: usize = MQ_VARIABLES * (MQ_VARIABLES + 1) / 2;

/// BLAKE3 `derive_key` context that expands a seed into the secret trapdoor.
pub const MQ_KEY_EXPANSION_CONTEXT: &str = "helix-ledger 2026-01-01 neo seal key expansion v1";

/// Upper bound on counter values tried by `sign` before giving up. Each
/// attempt fails with probability about 1/16, so running out is never
/// expected in practice.
pub const MAX_SIGN_ATTEMPTS: u32 = 64;

// ---------------------------------------------------------------------------
// Canonical Serialization Domain Tags
// ---------------------------------------------------------------------------

/// Prefix of a transaction's canonical bytes.
pub const TX_DOMAIN_TAG: &[u8] = b"helix/tx/v1";

/// Prefix of a template's canonical bytes.
pub const TEMPLATE_DOMAIN_TAG: &[u8] = b"helix/rna-template/v1";

/// Prefix of a block's canonical bytes.
pub const BLOCK_DOMAIN_TAG: &[u8] = b"helix/block/v1";

/// Prefix of the bytes hashed to re-randomize a signing target.
pub const SEAL_RETRY_DOMAIN_TAG: &[u8] = b"helix/seal-retry/v1";

// ---------------------------------------------------------------------------
// Data Model Limits
// ---------------------------------------------------------------------------

/// Longest accepted sender/recipient identifier, in bytes.
pub const MAX_ADDRESS_LENGTH: usize = 128;

/// Most metadata entries on a transaction or template.
pub const MAX_METADATA_ENTRIES: usize = 32;

/// Longest metadata key, in bytes.
pub const MAX_METADATA_KEY_LENGTH: usize = 64;

/// Longest metadata value, in bytes.
pub const MAX_METADATA_VALUE_LENGTH: usize = 1024;

/// Longest transaction payload, in quadrits.
pub const MAX_PAYLOAD_QUADRITS: usize = 16 * 1024;

/// Most transactions one template may reference.
pub const MAX_TEMPLATE_TRANSACTIONS: usize = 4096;

// ---------------------------------------------------------------------------
// Finality Defaults
// ---------------------------------------------------------------------------

/// Default quorum numerator. A block is final once attested weight is
/// strictly greater than `num/den` of the total.
pub const DEFAULT_QUORUM_NUMERATOR: u64 = 2;

/// Default quorum denominator.
pub const DEFAULT_QUORUM_DENOMINATOR: u64 = 3;

/// How long a candidate may sit in `Attesting` before it is rejected.
pub const DEFAULT_CANDIDATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Weight assigned to a validator registered without an explicit stake.
pub const DEFAULT_VALIDATOR_WEIGHT: u64 = 1;

// ---------------------------------------------------------------------------
// Pool Defaults
// ---------------------------------------------------------------------------

/// Maximum transactions held in the intake pool.
pub const DEFAULT_POOL_MAX_SIZE: usize = 50_000;

/// Maximum pending transactions per sender.
pub const DEFAULT_POOL_MAX_PER_SENDER: usize = 1_000;

/// Default cap on transactions drained into a single template.
pub const DEFAULT_TEMPLATE_BATCH: usize = 512;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 9741;

/// How often the devnet loop turns pending transactions into a template.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Number of in-process validators started by `helix-node run --devnet`.
pub const DEFAULT_DEVNET_VALIDATORS: usize = 4;

/// Seed prefix of devnet validator keys. Validator `i` uses
/// `"{DEVNET_SEED_PREFIX}-{i}"`.
pub const DEVNET_SEED_PREFIX: &str = "helix-devnet-validator";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mq_dimensions_are_consistent() {
        assert_eq!(MQ_VARIABLES, 160);
        assert_eq!(MQ_COEFFS_PER_EQUATION, 12_880);
        // One equation per digest nibble, or targets would not line up.
        assert_eq!(MQ_EQUATIONS, DIGEST_NIBBLES);
        // UOV needs at least as many oil variables as equations to solve.
        assert!(MQ_OIL_VARS >= MQ_EQUATIONS);
    }

    #[test]
    fn quorum_default_is_two_thirds() {
        assert!(DEFAULT_QUORUM_NUMERATOR < DEFAULT_QUORUM_DENOMINATOR);
        assert_eq!(DEFAULT_QUORUM_NUMERATOR * 3, DEFAULT_QUORUM_DENOMINATOR * 2);
    }

    #[test]
    fn domain_tags_are_distinct() {
        let tags = [
            TX_DOMAIN_TAG,
            TEMPLATE_DOMAIN_TAG,
            BLOCK_DOMAIN_TAG,
            SEAL_RETRY_DOMAIN_TAG,
        ];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_ne!(QUADRIT_HASH_CONTEXT, MQ_KEY_EXPANSION_CONTEXT);
    }

    #[test]
    fn pool_defaults_sanity() {
        assert!(DEFAULT_POOL_MAX_PER_SENDER <= DEFAULT_POOL_MAX_SIZE);
        assert!(DEFAULT_TEMPLATE_BATCH <= MAX_TEMPLATE_TRANSACTIONS);
    }
}
