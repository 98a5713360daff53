//! Configuration hashing for change detection.
//!
//! Hashes are computed over the canonical JSON form of a value. Every map in
//! the configuration and payload types is a `BTreeMap`, so the JSON, and the
//! hash, is stable across runs.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::parser::LoadedConfig;

/// Hasher for computing configuration and payload fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the loaded configuration (settings and subscriptions).
    #[must_use]
    pub fn hash_config(&self, config: &LoadedConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_bytes(&config.settings));
        for (key, spec) in &config.subscriptions {
            hasher.update(key.as_bytes());
            hasher.update(canonical_bytes(spec));
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of any serializable value.
    #[must_use]
    pub fn hash_value<T: Serialize>(&self, value: &T) -> String {
        hex::encode(Sha256::digest(canonical_bytes(value)))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}
