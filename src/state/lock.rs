//! Ledger locking.
//!
//! An apply holds the lock for the whole run. The lock names the run that
//! owns it, so a stuck lock can be traced back to a ledger entry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a lock stays valid without being released.
pub const LOCK_TTL_SECS: i64 = 3600;

/// The run asking for the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    /// Process identity, see [`holder_id`].
    pub holder: String,
    /// Hash of the configuration being applied.
    pub config_hash: String,
    /// Nodes in the plan being applied.
    pub planned_nodes: usize,
}

impl LockOwner {
    /// Owner for a plan applied by this process.
    #[must_use]
    pub fn for_plan(config_hash: &str, planned_nodes: usize) -> Self {
        Self {
            holder: holder_id(),
            config_hash: config_hash.to_string(),
            planned_nodes,
        }
    }
}

/// Lock file contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerLock {
    /// Run that holds the lock; the saved ledger carries the same id.
    pub run_id: String,
    /// Process identity.
    pub holder: String,
    /// Hash of the configuration being applied.
    pub config_hash: String,
    /// Nodes in the plan being applied.
    #[serde(default)]
    pub planned_nodes: usize,
    /// When the run started.
    pub acquired_at: DateTime<Utc>,
    /// After this the lock may be taken over.
    pub expires_at: DateTime<Utc>,
}

impl LedgerLock {
    /// Starts a new run for `owner`.
    #[must_use]
    pub fn start(owner: LockOwner, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            holder: owner.holder,
            config_hash: owner.config_hash,
            planned_nodes: owner.planned_nodes,
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_TTL_SECS),
        }
    }

    /// True once the run has outlived its lock.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before the lock goes stale, never negative.
    #[must_use]
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// One-line description for logs and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        let hash: String = self.config_hash.chars().take(8).collect();
        format!(
            "run {} by {} (config {hash}, {} nodes)",
            self.run_id, self.holder, self.planned_nodes
        )
    }
}

/// `hostname:pid` of the current process.
#[must_use]
pub fn holder_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| String::from("unknown-host"));
    format!("{host}:{}", std::process::id())
}
