//! Run ledger types.
//!
//! The ledger is the per-node record of a run: status, resource id, error and
//! change. It is persisted after every run and read back by the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cloud::Change;
use crate::error::ApplyError;
use crate::graph::{AccountContext, NodeId, ResourceKind};

/// Current version of the ledger format.
pub const LEDGER_VERSION: &str = "1.0";

/// Number of past runs kept in the history.
const MAX_HISTORY: usize = 50;

/// Status of a node within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not started.
    Pending,
    /// In flight.
    Applying,
    /// Applied successfully.
    Applied,
    /// Failed.
    Failed,
    /// Not attempted because a dependency did not apply or the run was cancelled.
    Skipped,
}

/// One node's record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerRecord {
    /// Node key.
    pub node_key: String,
    /// Node kind.
    pub kind: ResourceKind,
    /// Account context.
    pub target: AccountContext,
    /// Current status.
    pub status: NodeStatus,
    /// Resource id once applied.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Error message for failed or skipped nodes.
    #[serde(default)]
    pub error: Option<String>,
    /// What the last ensure call did.
    #[serde(default)]
    pub change: Option<Change>,
    /// Number of ensure attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Hash of the node's desired state.
    #[serde(default)]
    pub fingerprint: String,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// Summary of a past run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunHistoryEntry {
    /// Run id.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Configuration hash.
    pub config_hash: String,
    /// Applied nodes.
    pub applied: usize,
    /// Failed nodes.
    pub failed: usize,
    /// Skipped nodes.
    pub skipped: usize,
}

/// The persisted ledger of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedger {
    /// Ledger format version.
    pub version: String,
    /// Run id.
    pub run_id: String,
    /// Hash of the configuration the run applied.
    pub config_hash: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether the run was cancelled.
    #[serde(default)]
    pub cancelled: bool,
    /// Records in plan order.
    pub records: Vec<LedgerRecord>,
    /// Summaries of earlier runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Counts by status and change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    /// Applied nodes.
    pub applied: usize,
    /// Failed nodes.
    pub failed: usize,
    /// Skipped nodes.
    pub skipped: usize,
    /// Pending or in-flight nodes.
    pub pending: usize,
    /// Nodes created.
    pub created: usize,
    /// Nodes updated.
    pub updated: usize,
    /// Nodes already matching.
    pub unchanged: usize,
}

impl NodeStatus {
    /// Returns true if the node will not change status again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Skipped)
    }
}

impl LedgerRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn pending(id: &NodeId, target: AccountContext, fingerprint: impl Into<String>) -> Self {
        Self {
            node_key: id.key.clone(),
            kind: id.kind,
            target,
            status: NodeStatus::Pending,
            resource_id: None,
            error: None,
            change: None,
            attempts: 0,
            fingerprint: fingerprint.into(),
            updated_at: Utc::now(),
        }
    }

    /// Node id of this record.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.kind, self.node_key.as_str())
    }

    fn matches(&self, id: &NodeId) -> bool {
        self.kind == id.kind && self.node_key == id.key
    }

    fn touch(&mut self, status: NodeStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

impl RunLedger {
    /// Starts a ledger, carrying the history of `previous`.
    #[must_use]
    pub fn new(config_hash: &str, previous: Option<&Self>) -> Self {
        let mut history = previous.map(|p| p.history.clone()).unwrap_or_default();
        if let Some(prev) = previous {
            history.push(prev.history_entry());
            if history.len() > MAX_HISTORY {
                history.drain(..history.len() - MAX_HISTORY);
            }
        }

        Self {
            version: LEDGER_VERSION.to_string(),
            run_id: Uuid::new_v4().to_string(),
            config_hash: config_hash.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            records: Vec::new(),
            history,
        }
    }

    /// Uses the id of the run holding the ledger lock.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Appends a record.
    pub fn push(&mut self, record: LedgerRecord) {
        self.records.push(record);
    }

    /// Gets a record.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&LedgerRecord> {
        self.records.iter().find(|r| r.matches(id))
    }

    fn get_mut(&mut self, id: &NodeId) -> Option<&mut LedgerRecord> {
        self.records.iter_mut().find(|r| r.matches(id))
    }

    /// Status of a node.
    #[must_use]
    pub fn status(&self, id: &NodeId) -> Option<NodeStatus> {
        self.get(id).map(|r| r.status)
    }

    /// Resource id of an applied node.
    #[must_use]
    pub fn resource_id(&self, id: &NodeId) -> Option<&str> {
        self.get(id)
            .filter(|r| r.status == NodeStatus::Applied)
            .and_then(|r| r.resource_id.as_deref())
    }

    /// Marks a node in flight.
    pub fn mark_applying(&mut self, id: &NodeId) {
        if let Some(record) = self.get_mut(id) {
            record.touch(NodeStatus::Applying);
        }
    }

    /// Marks a node applied.
    pub fn mark_applied(&mut self, id: &NodeId, resource_id: String, change: Change, attempts: u32) {
        if let Some(record) = self.get_mut(id) {
            record.resource_id = Some(resource_id);
            record.change = Some(change);
            record.attempts = attempts;
            record.error = None;
            record.touch(NodeStatus::Applied);
        }
    }

    /// Marks a node failed.
    pub fn mark_failed(&mut self, id: &NodeId, error: String, attempts: u32) {
        if let Some(record) = self.get_mut(id) {
            record.error = Some(error);
            record.attempts = attempts;
            record.touch(NodeStatus::Failed);
        }
    }

    /// Marks a node skipped.
    pub fn mark_skipped(&mut self, id: &NodeId, reason: String) {
        if let Some(record) = self.get_mut(id) {
            record.error = Some(reason);
            record.touch(NodeStatus::Skipped);
        }
    }

    /// Marks the run finished.
    pub fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Counts records by status and change.
    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for record in &self.records {
            match record.status {
                NodeStatus::Applied => summary.applied += 1,
                NodeStatus::Failed => summary.failed += 1,
                NodeStatus::Skipped => summary.skipped += 1,
                NodeStatus::Pending | NodeStatus::Applying => summary.pending += 1,
            }
            match record.change {
                Some(Change::Created) => summary.created += 1,
                Some(Change::Updated) => summary.updated += 1,
                Some(Change::Unchanged) => summary.unchanged += 1,
                None => {}
            }
        }
        summary
    }

    fn keys_with(&self, status: NodeStatus) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.node_id().to_string())
            .collect()
    }

    /// Fails with `PartialApply` if any node failed or the run was cancelled.
    ///
    /// # Errors
    ///
    /// Returns `PartialApply` naming failed, skipped and applied nodes.
    pub fn ensure_success(&self) -> std::result::Result<(), ApplyError> {
        let failed = self.keys_with(NodeStatus::Failed);
        if failed.is_empty() && !self.cancelled {
            return Ok(());
        }
        Err(ApplyError::PartialApply {
            failed,
            skipped: self.keys_with(NodeStatus::Skipped),
            succeeded: self.keys_with(NodeStatus::Applied),
        })
    }

    fn history_entry(&self) -> RunHistoryEntry {
        let summary = self.summary();
        RunHistoryEntry {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            config_hash: self.config_hash.clone(),
            applied: summary.applied,
            failed: summary.failed,
            skipped: summary.skipped,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{status}")
    }
}
