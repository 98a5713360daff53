//! Resume report.
//!
//! Compares a new plan against the previous run's ledger so a re-run can
//! say what already applied, what will be retried and what changed since.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::ConfigHasher;
use crate::graph::NodeId;
use crate::state::{NodeStatus, RunLedger};

use super::plan::ExecutionPlan;

/// How a planned node relates to the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResumeState {
    /// Applied last time with the same desired state.
    PreviouslyApplied,
    /// Applied last time but the desired state changed since.
    Changed,
    /// Failed, skipped or never finished last time.
    Retry,
    /// Not in the previous ledger.
    New,
}

/// One planned node's resume state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeEntry {
    /// Node id.
    pub id: NodeId,
    /// Resume state.
    pub state: ResumeState,
    /// Status in the previous ledger, if recorded.
    pub previous_status: Option<NodeStatus>,
    /// Error recorded last time.
    pub previous_error: Option<String>,
}

/// Result of comparing a plan with the previous ledger.
#[derive(Debug, Clone, Default)]
pub struct ResumeReport {
    /// Previous run id, if any.
    pub previous_run_id: Option<String>,
    /// Whether the configuration hash differs from the previous run.
    pub config_changed: bool,
    /// Entries in plan order.
    pub entries: Vec<ResumeEntry>,
    /// Nodes recorded last time that are no longer planned.
    pub orphaned: Vec<NodeId>,
}

impl ResumeReport {
    /// Builds the report for `plan` against `previous`.
    #[must_use]
    pub fn compare(plan: &ExecutionPlan, previous: Option<&RunLedger>) -> Self {
        let Some(previous) = previous else {
            return Self {
                entries: plan
                    .ordered_nodes()
                    .map(|(_, node)| ResumeEntry {
                        id: node.id.clone(),
                        state: ResumeState::New,
                        previous_status: None,
                        previous_error: None,
                    })
                    .collect(),
                ..Self::default()
            };
        };

        let hasher = ConfigHasher::new();
        let mut planned = BTreeSet::new();
        let mut entries = Vec::with_capacity(plan.node_count());

        for (_, node) in plan.ordered_nodes() {
            planned.insert(node.id.clone());
            let entry = match previous.get(&node.id) {
                None => ResumeEntry {
                    id: node.id.clone(),
                    state: ResumeState::New,
                    previous_status: None,
                    previous_error: None,
                },
                Some(record) => {
                    let state = if record.status != NodeStatus::Applied {
                        ResumeState::Retry
                    } else if record.fingerprint == hasher.hash_value(&node.payload) {
                        ResumeState::PreviouslyApplied
                    } else {
                        ResumeState::Changed
                    };
                    ResumeEntry {
                        id: node.id.clone(),
                        state,
                        previous_status: Some(record.status),
                        previous_error: record.error.clone(),
                    }
                }
            };
            entries.push(entry);
        }

        let orphaned: Vec<NodeId> = previous
            .records
            .iter()
            .map(crate::state::LedgerRecord::node_id)
            .filter(|id| !planned.contains(id))
            .collect();
        for id in &orphaned {
            debug!("Node {id} was recorded last run but is no longer planned");
        }

        Self {
            previous_run_id: Some(previous.run_id.clone()),
            config_changed: previous.config_hash != plan.config_hash,
            entries,
            orphaned,
        }
    }

    /// Number of entries in the given state.
    #[must_use]
    pub fn count(&self, state: ResumeState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// Entries that did not finish last time.
    pub fn retries(&self) -> impl Iterator<Item = &ResumeEntry> {
        self.entries.iter().filter(|e| e.state == ResumeState::Retry)
    }

    /// Returns true if there is no previous run to resume from.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.previous_run_id.is_none()
    }
}

impl std::fmt::Display for ResumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreviouslyApplied => "applied",
            Self::Changed => "changed",
            Self::Retry => "retry",
            Self::New => "new",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResumeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.previous_run_id {
            None => write!(f, "no previous run, {} new nodes", self.entries.len()),
            Some(run_id) => write!(
                f,
                "resuming after run {run_id}: {} applied, {} changed, {} to retry, {} new, {} orphaned",
                self.count(ResumeState::PreviouslyApplied),
                self.count(ResumeState::Changed),
                self.count(ResumeState::Retry),
                self.count(ResumeState::New),
                self.orphaned.len()
            ),
        }
    }
}
