//! Run ledger persistence.
//!
//! The ledger records every node's outcome so a later run can report what
//! was applied and retry what was not.

mod store;
mod local;
mod lock;
mod types;

pub use store::LedgerStore;
pub use local::{LEDGER_DIR, LocalLedgerStore};
pub use lock::{LOCK_TTL_SECS, LedgerLock, LockOwner, holder_id};
pub use types::{LEDGER_VERSION, LedgerRecord, LedgerSummary, NodeStatus, RunHistoryEntry, RunLedger};
