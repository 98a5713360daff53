//! Ledger store trait definition.

use async_trait::async_trait;

use crate::error::Result;
use super::types::RunLedger;
use super::lock::{LedgerLock, LockOwner};

/// Trait for ledger storage backends.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Loads the last run's ledger.
    ///
    /// Returns `None` if no run has been recorded yet.
    async fn load(&self) -> Result<Option<RunLedger>>;

    /// Saves a run's ledger.
    async fn save(&self, ledger: &RunLedger) -> Result<()>;

    /// Locks the ledger for a new run. A stale lock is taken over.
    async fn acquire_lock(&self, owner: LockOwner) -> Result<LedgerLock>;

    /// Releases the lock if `run_id` still holds it.
    async fn release_lock(&self, run_id: &str) -> Result<()>;

    /// Removes the lock regardless of holder.
    async fn force_unlock(&self) -> Result<Option<LedgerLock>>;

    /// The current lock, stale or not.
    async fn current_lock(&self) -> Result<Option<LedgerLock>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
