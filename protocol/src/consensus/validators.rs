//! Validator registry and the CIP quorum rule.
//!
//! A validator is identified by the fingerprint of its public system. Each
//! carries a weight (1 by default); an external staking layer can set other
//! weights, and the quorum rule works on weights, never on head counts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DEFAULT_QUORUM_DENOMINATOR, DEFAULT_QUORUM_NUMERATOR, DEFAULT_VALIDATOR_WEIGHT};
use crate::crypto::hash::QuadritDigest;
use crate::crypto::mq::PublicSystem;

/// A threshold fraction that is not in `[0, 1)` with a non-zero denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid quorum threshold {numerator}/{denominator}")]
pub struct InvalidThreshold {
    pub numerator: u64,
    pub denominator: u64,
}

// ---------------------------------------------------------------------------
// QuorumThreshold
// ---------------------------------------------------------------------------

/// Fraction of total weight that must be *strictly exceeded* to finalize.
///
/// The default is 2/3: with four validators of weight 1, three attestations
/// finalize and two do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThreshold")]
pub struct QuorumThreshold {
    numerator: u64,
    denominator: u64,
}

#[derive(Deserialize)]
struct RawThreshold {
    numerator: u64,
    denominator: u64,
}

impl TryFrom<RawThreshold> for QuorumThreshold {
    type Error = InvalidThreshold;

    fn try_from(raw: RawThreshold) -> Result<Self, Self::Error> {
        QuorumThreshold::new(raw.numerator, raw.denominator)
    }
}

impl QuorumThreshold {
    /// `numerator / denominator`, which must be below 1.
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, InvalidThreshold> {
        if denominator == 0 || numerator >= denominator {
            return Err(InvalidThreshold {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// `attested / total > numerator / denominator`, in `u128` so weights
    /// anywhere in `u64` cannot overflow. Never met when `total` is zero.
    pub fn is_met(&self, attested: u64, total: u64) -> bool {
        if total == 0 {
            return false;
        }
        (attested as u128) * (self.denominator as u128)
            > (total as u128) * (self.numerator as u128)
    }

    /// Smallest attested weight that meets the threshold against `total`.
    pub fn required_weight(&self, total: u64) -> u64 {
        if total == 0 {
            return 0;
        }
        let bound = (total as u128) * (self.numerator as u128) / (self.denominator as u128);
        (bound + 1).min(total as u128) as u64
    }
}

impl Default for QuorumThreshold {
    fn default() -> Self {
        Self {
            numerator: DEFAULT_QUORUM_NUMERATOR,
            denominator: DEFAULT_QUORUM_DENOMINATOR,
        }
    }
}

impl fmt::Display for QuorumThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">{}/{}", self.numerator, self.denominator)
    }
}

// ---------------------------------------------------------------------------
// ValidatorSet
// ---------------------------------------------------------------------------

/// One registered validator.
#[derive(Debug, Clone)]
pub struct ValidatorEntry {
    pub public_system: Arc<PublicSystem>,
    pub weight: u64,
}

/// Serializable view of a validator, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSummary {
    pub id: QuadritDigest,
    pub weight: u64,
}

/// The validators whose attestations count, keyed by fingerprint.
///
/// The finality engine snapshots this (behind an `Arc`) into every candidate
/// at proposal time, so changing the set never affects candidates already in
/// flight.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    validators: BTreeMap<QuadritDigest, ValidatorEntry>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set of weight-1 validators.
    pub fn from_public_systems<I>(systems: I) -> Self
    where
        I: IntoIterator<Item = Arc<PublicSystem>>,
    {
        let mut set = Self::new();
        for system in systems {
            set.insert(system, DEFAULT_VALIDATOR_WEIGHT);
        }
        set
    }

    /// Registers (or re-weights) a validator and returns its id. A weight of
    /// zero is allowed: the validator may attest but never tips the quorum.
    pub fn insert(&mut self, public_system: Arc<PublicSystem>, weight: u64) -> QuadritDigest {
        let id = public_system.fingerprint();
        self.validators.insert(
            id,
            ValidatorEntry {
                public_system,
                weight,
            },
        );
        id
    }

    pub fn remove(&mut self, id: &QuadritDigest) -> Option<ValidatorEntry> {
        self.validators.remove(id)
    }

    pub fn get(&self, id: &QuadritDigest) -> Option<&ValidatorEntry> {
        self.validators.get(id)
    }

    pub fn contains(&self, id: &QuadritDigest) -> bool {
        self.validators.contains_key(id)
    }

    pub fn public_system(&self, id: &QuadritDigest) -> Option<&Arc<PublicSystem>> {
        self.validators.get(id).map(|e| &e.public_system)
    }

    /// Weight of `id`, zero for strangers.
    pub fn weight_of(&self, id: &QuadritDigest) -> u64 {
        self.validators.get(id).map_or(0, |e| e.weight)
    }

    /// Sum of all weights, saturating at `u64::MAX`.
    pub fn total_weight(&self) -> u64 {
        self.validators
            .values()
            .fold(0u64, |acc, e| acc.saturating_add(e.weight))
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validator ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &QuadritDigest> {
        self.validators.keys()
    }

    pub fn summaries(&self) -> Vec<ValidatorSummary> {
        self.validators
            .iter()
            .map(|(id, e)| ValidatorSummary {
                id: *id,
                weight: e.weight,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::mq::derive_keypair;
    use std::sync::OnceLock;

    fn systems() -> &'static Vec<Arc<PublicSystem>> {
        static SYSTEMS: OnceLock<Vec<Arc<PublicSystem>>> = OnceLock::new();
        SYSTEMS.get_or_init(|| {
            (0..3u8)
                .map(|i| Arc::clone(derive_keypair(&[b'v', i]).public_system()))
                .collect()
        })
    }

    #[test]
    fn two_thirds_is_strict() {
        let q = QuorumThreshold::default();
        assert!(!q.is_met(2, 3));
        assert!(q.is_met(3, 3));
        assert!(!q.is_met(2, 4));
        assert!(q.is_met(3, 4));
        assert!(!q.is_met(0, 0));
        assert_eq!(q.required_weight(4), 3);
        assert_eq!(q.required_weight(3), 3);
        assert_eq!(q.required_weight(100), 67);
    }

    #[test]
    fn quorum_is_monotonic() {
        let q = QuorumThreshold::default();
        for total in 1..=50u64 {
            let mut met = false;
            for attested in 0..=total {
                let now = q.is_met(attested, total);
                assert!(!met || now, "lost quorum at {attested}/{total}");
                met = now;
            }
            assert!(met);
        }
    }

    #[test]
    fn huge_weights_do_not_overflow() {
        let q = QuorumThreshold::default();
        assert!(q.is_met(u64::MAX, u64::MAX));
        assert!(!q.is_met(u64::MAX / 2, u64::MAX));
    }

    #[test]
    fn bad_thresholds_rejected() {
        assert!(QuorumThreshold::new(1, 0).is_err());
        assert!(QuorumThreshold::new(3, 3).is_err());
        assert!(QuorumThreshold::new(1, 2).is_ok());
        let parsed: Result<QuorumThreshold, _> =
            serde_json::from_str(r#"{"numerator":5,"denominator":4}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn set_tracks_weights() {
        let mut set = ValidatorSet::from_public_systems(systems().iter().cloned());
        assert_eq!(set.len(), 3);
        assert_eq!(set.total_weight(), 3);

        let id = set.insert(Arc::clone(&systems()[0]), 5);
        assert_eq!(set.len(), 3);
        assert_eq!(set.weight_of(&id), 5);
        assert_eq!(set.total_weight(), 7);

        set.remove(&id);
        assert_eq!(set.total_weight(), 2);
        assert!(!set.contains(&id));
        assert_eq!(set.weight_of(&id), 0);
    }

    #[test]
    fn ids_are_fingerprints() {
        let set = ValidatorSet::from_public_systems(systems().iter().cloned());
        for system in systems() {
            assert!(set.contains(&system.fingerprint()));
        }
        let ids: Vec<_> = set.ids().copied().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
