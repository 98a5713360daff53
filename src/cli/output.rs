//! Output formatting for CLI commands.
//!
//! Text output uses tables and colored status; JSON output is meant for
//! scripting and goes to stdout unchanged.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::cloud::Change;
use crate::config::{LoadedConfig, ValidationResult};
use crate::graph::{AccountContext, HubNetwork};
use crate::planner::{ExecutionPlan, ResumeReport, ResumeState};
use crate::state::{LedgerLock, LedgerSummary, NodeStatus, RunLedger};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan node row for table display.
#[derive(Tabled)]
struct PlanNodeRow {
    #[tabled(rename = "Batch")]
    batch: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// Ledger record row for table display.
#[derive(Tabled)]
struct LedgerRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when emitting JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &LoadedConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        let vnets = config
            .subscriptions
            .values()
            .filter(|s| s.virtual_network.is_some())
            .count();

        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
                "subscriptions": config.subscriptions.len(),
                "virtual_networks": vnets,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Configuration is invalid:", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "   Subscriptions: {}", config.subscriptions.len());
                let _ = writeln!(output, "   Virtual networks: {vnets}");
                let _ = writeln!(output, "   Default location: {}", config.settings.default_location);
                output
            }
        }
    }

    /// Formats an execution plan.
    #[must_use]
    pub fn format_plan(
        &self,
        plan: &ExecutionPlan,
        hub: Option<&HubNetwork>,
        resume: Option<&ResumeReport>,
        detailed: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::new(plan, hub, resume)),
            OutputFormat::Text => Self::format_plan_text(plan, hub, resume, detailed),
        }
    }

    fn format_plan_text(
        plan: &ExecutionPlan,
        hub: Option<&HubNetwork>,
        resume: Option<&ResumeReport>,
        detailed: bool,
    ) -> String {
        if plan.is_empty() {
            return format!("{} Nothing to provision.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = write!(output, "\nExecution Plan\n");
        let _ = writeln!(output, "   Config hash: {}", short(&plan.config_hash));
        if let Some(hub) = hub {
            let _ = writeln!(output, "   Hub network: {}", hub.id);
        }
        output.push('\n');

        let rows: Vec<PlanNodeRow> = plan
            .ordered_nodes()
            .map(|(batch, node)| PlanNodeRow {
                batch: batch + 1,
                kind: node.kind().to_string(),
                key: node.key().to_string(),
                resource: truncate(&node.payload.display_name(), 40),
                account: format_account(node.target),
                depends_on: if detailed {
                    node.dependencies
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    node.dependencies.len().to_string()
                },
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let counts = plan
            .kind_counts()
            .iter()
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            output,
            "\nPlan: {} nodes in {} batches ({counts})\n",
            plan.node_count().to_string().green(),
            plan.batches.len()
        );

        if let Some(report) = resume {
            let _ = writeln!(output, "{}", Self::format_resume_line(report));
        }

        output
    }

    fn format_resume_line(report: &ResumeReport) -> String {
        if report.is_fresh() {
            return String::from("No previous run recorded.");
        }
        let mut line = format!(
            "Since last run: {} applied, {} changed, {} to retry, {} new",
            report.count(ResumeState::PreviouslyApplied).to_string().green(),
            report.count(ResumeState::Changed).to_string().yellow(),
            report.count(ResumeState::Retry).to_string().red(),
            report.count(ResumeState::New)
        );
        if !report.orphaned.is_empty() {
            let _ = write!(
                line,
                "\n{} {} node(s) recorded last run are no longer planned",
                "⚠".yellow(),
                report.orphaned.len()
            );
        }
        line
    }

    /// Formats a run ledger.
    #[must_use]
    pub fn format_ledger(&self, ledger: &RunLedger, history: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                if history {
                    to_json(ledger)
                } else {
                    to_json(&LedgerJson::from(ledger))
                }
            }
            OutputFormat::Text => Self::format_ledger_text(ledger, history),
        }
    }

    fn format_ledger_text(ledger: &RunLedger, history: bool) -> String {
        let mut output = String::new();
        let _ = write!(output, "\nRun {}\n", ledger.run_id);
        let _ = writeln!(output, "   Config hash: {}", short(&ledger.config_hash));
        let _ = writeln!(output, "   Started: {}", ledger.started_at.format("%Y-%m-%d %H:%M:%S"));
        if let Some(finished) = ledger.finished_at {
            let _ = writeln!(output, "   Finished: {}", finished.format("%Y-%m-%d %H:%M:%S"));
        }
        if ledger.cancelled {
            let _ = writeln!(output, "   {}", "cancelled".yellow());
        }
        output.push('\n');

        let rows: Vec<LedgerRow> = ledger
            .records
            .iter()
            .map(|r| LedgerRow {
                node: r.node_id().to_string(),
                status: format_status(r.status),
                change: r.change.map_or_else(String::new, format_change),
                attempts: r.attempts,
                detail: truncate(
                    r.error.as_deref().or(r.resource_id.as_deref()).unwrap_or(""),
                    60,
                ),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        let _ = writeln!(output, "\n{}", format_summary(&ledger.summary()));

        if history && !ledger.history.is_empty() {
            let _ = writeln!(output, "\nEarlier runs ({}):", ledger.history.len());
            for entry in ledger.history.iter().rev() {
                let marker = if entry.failed == 0 {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let _ = writeln!(
                    output,
                    "   {marker} {} {} - {} applied, {} failed, {} skipped",
                    entry.started_at.format("%Y-%m-%d %H:%M"),
                    entry.run_id,
                    entry.applied,
                    entry.failed,
                    entry.skipped
                );
            }
        }

        output
    }

    /// Formats the outcome of an apply run.
    #[must_use]
    pub fn format_apply_result(&self, ledger: &RunLedger) -> String {
        match self.format {
            OutputFormat::Json => to_json(&LedgerJson::from(ledger)),
            OutputFormat::Text => {
                let summary = ledger.summary();
                let status = if summary.failed == 0 && !ledger.cancelled {
                    format!("{} Apply complete", "✓".green())
                } else if ledger.cancelled {
                    format!("{} Apply cancelled", "⚠".yellow())
                } else {
                    format!("{} Apply finished with failures", "✗".red())
                };

                let mut output = format!("{status}\n   {}\n", format_summary(&summary));
                for record in ledger
                    .records
                    .iter()
                    .filter(|r| r.status == NodeStatus::Failed)
                {
                    let _ = writeln!(
                        output,
                        "   {} {}: {}",
                        "✗".red(),
                        record.node_id(),
                        record.error.as_deref().unwrap_or("unknown error")
                    );
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LedgerLock>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "lock": lock })),
            OutputFormat::Text => lock.map_or_else(
                || String::from("Ledger is not locked."),
                |l| {
                    let now = chrono::Utc::now();
                    let state = if l.is_stale(now) {
                        String::from("stale, next apply takes it over")
                    } else {
                        format!("expires in {}s", l.time_left(now).num_seconds())
                    };
                    format!(
                        "Locked for {} since {} ({state})",
                        l.describe(),
                        l.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                    )
                },
            ),
        }
    }

    /// Formats a plain status message.
    #[must_use]
    pub fn message(&self, status: MessageKind, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": status.as_str(),
                "message": message,
            })),
            OutputFormat::Text => {
                let marker = match status {
                    MessageKind::Success => "✓".green(),
                    MessageKind::Warning => "⚠".yellow(),
                    MessageKind::Error => "✗".red(),
                };
                format!("{marker} {message}")
            }
        }
    }
}

/// Kind of a plain status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Operation succeeded.
    Success,
    /// Non-fatal issue.
    Warning,
    /// Operation failed.
    Error,
}

impl MessageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn format_account(target: AccountContext) -> String {
    match target {
        AccountContext::Spoke => String::from("spoke"),
        AccountContext::Connectivity => "connectivity".cyan().to_string(),
    }
}

fn format_status(status: NodeStatus) -> String {
    match status {
        NodeStatus::Applied => "applied".green().to_string(),
        NodeStatus::Failed => "failed".red().to_string(),
        NodeStatus::Skipped => "skipped".yellow().to_string(),
        NodeStatus::Pending | NodeStatus::Applying => status.to_string().dimmed().to_string(),
    }
}

fn format_change(change: Change) -> String {
    match change {
        Change::Created => "+created".green().to_string(),
        Change::Updated => "~updated".yellow().to_string(),
        Change::Unchanged => "unchanged".dimmed().to_string(),
    }
}

fn format_summary(summary: &LedgerSummary) -> String {
    format!(
        "{} applied ({} created, {} updated, {} unchanged), {} failed, {} skipped",
        summary.applied,
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.failed,
        summary.skipped
    )
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    hub_vnet_id: Option<String>,
    node_count: usize,
    batches: Vec<Vec<String>>,
    nodes: Vec<NodeJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resume: Option<ResumeJson>,
}

#[derive(Serialize)]
struct NodeJson {
    id: String,
    batch: usize,
    target: AccountContext,
    depends_on: Vec<String>,
    desired: serde_json::Value,
}

#[derive(Serialize)]
struct ResumeJson {
    previous_run_id: Option<String>,
    config_changed: bool,
    entries: Vec<(String, String)>,
    orphaned: Vec<String>,
}

impl PlanJson {
    fn new(plan: &ExecutionPlan, hub: Option<&HubNetwork>, resume: Option<&ResumeReport>) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            hub_vnet_id: hub.map(|h| h.id.clone()),
            node_count: plan.node_count(),
            batches: plan
                .batches
                .iter()
                .map(|b| b.iter().map(ToString::to_string).collect())
                .collect(),
            nodes: plan
                .ordered_nodes()
                .map(|(batch, node)| NodeJson {
                    id: node.id.to_string(),
                    batch,
                    target: node.target,
                    depends_on: node.dependencies.iter().map(ToString::to_string).collect(),
                    desired: serde_json::to_value(&node.payload).unwrap_or_default(),
                })
                .collect(),
            resume: resume.map(|r| ResumeJson {
                previous_run_id: r.previous_run_id.clone(),
                config_changed: r.config_changed,
                entries: r
                    .entries
                    .iter()
                    .map(|e| (e.id.to_string(), e.state.to_string()))
                    .collect(),
                orphaned: r.orphaned.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

#[derive(Serialize)]
struct LedgerJson<'a> {
    run_id: &'a str,
    config_hash: &'a str,
    cancelled: bool,
    summary: LedgerSummary,
    records: &'a [crate::state::LedgerRecord],
}

impl<'a> From<&'a RunLedger> for LedgerJson<'a> {
    fn from(ledger: &'a RunLedger) -> Self {
        Self {
            run_id: &ledger.run_id,
            config_hash: &ledger.config_hash,
            cancelled: ledger.cancelled,
            summary: ledger.summary(),
            records: &ledger.records,
        }
    }
}
