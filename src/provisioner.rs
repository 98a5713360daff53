//! Provisioning pipeline.
//!
//! Ties the stages together: validate the loaded configuration, resolve the
//! hub, build the dependency graph, plan it, then apply the plan under the
//! ledger lock and persist the resulting ledger.

use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, ConfigValidator, LoadedConfig};
use crate::error::Result;
use crate::graph::{
    DependencyGraphBuilder, FileHubLookup, HubNetwork, HubTopologyLookup, NoHubLookup,
    resolve_hub,
};
use crate::planner::{Applier, ExecutionPlan, Planner, ResumeReport};
use crate::state::{LedgerLock, LedgerStore, LocalLedgerStore, LockOwner, RunLedger};

/// A plan ready to apply.
#[derive(Debug)]
pub struct CompiledPlan {
    /// Ordered batches.
    pub plan: ExecutionPlan,
    /// Hub the peerings were generated against.
    pub hub: Option<HubNetwork>,
    /// Non-fatal validation findings.
    pub warnings: Vec<String>,
}

/// Runs the provisioning pipeline for one configuration.
pub struct Provisioner<'a> {
    /// Loaded configuration.
    config: &'a LoadedConfig,
    /// Hub topology source.
    lookup: Box<dyn HubTopologyLookup>,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

impl std::fmt::Debug for Provisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("subscriptions", &self.config.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner. The hub is read from `settings.hub.topology_file`
    /// when one is configured.
    #[must_use]
    pub fn new(config: &'a LoadedConfig) -> Self {
        let lookup: Box<dyn HubTopologyLookup> = match &config.settings.hub.topology_file {
            Some(path) => Box::new(FileHubLookup::new(config.base_dir.join(path))),
            None => Box::new(NoHubLookup),
        };

        Self {
            config,
            lookup,
            hasher: ConfigHasher::new(),
        }
    }

    /// Replaces the hub topology source.
    #[must_use]
    pub fn with_hub_lookup(mut self, lookup: Box<dyn HubTopologyLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Ledger store for this configuration.
    #[must_use]
    pub fn ledger_store(&self) -> LocalLedgerStore {
        LocalLedgerStore::for_config(&self.config.base_dir, self.config.settings.ledger.dir.as_deref())
    }

    /// Validates, resolves the hub, builds the graph and plans it.
    ///
    /// Nothing is sent to the cloud.
    ///
    /// # Errors
    ///
    /// Returns configuration or graph errors.
    pub async fn compile(&self) -> Result<CompiledPlan> {
        let validation = ConfigValidator::new().validate(self.config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }

        let hub = resolve_hub(self.lookup.as_ref(), &self.config.settings.hub).await?;
        let graph = DependencyGraphBuilder::new(&self.config.settings)
            .build(&self.config.subscriptions, hub.as_ref())?;
        debug!("Built graph with {} nodes", graph.len());

        let config_hash = self.hasher.hash_config(self.config);
        let plan = Planner::new().plan(graph, &config_hash)?;
        info!(
            "Planned {} nodes in {} batches (config {})",
            plan.node_count(),
            plan.batches.len(),
            self.hasher.short_hash(&config_hash)
        );

        Ok(CompiledPlan {
            plan,
            hub,
            warnings: validation.warnings,
        })
    }

    /// Loads the previous ledger and reports how the plan resumes from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn resume_report(
        &self,
        compiled: &CompiledPlan,
        store: &dyn LedgerStore,
    ) -> Result<ResumeReport> {
        let previous = store.load().await?;
        Ok(ResumeReport::compare(&compiled.plan, previous.as_ref()))
    }

    /// Applies a compiled plan under the ledger lock.
    ///
    /// The ledger is saved whatever the node outcomes; node failures are not
    /// an error here. Call [`RunLedger::ensure_success`] on the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere or the ledger cannot be
    /// read or written.
    pub async fn apply(
        &self,
        compiled: &CompiledPlan,
        store: &dyn LedgerStore,
        applier: &Applier,
    ) -> Result<RunLedger> {
        let owner = LockOwner::for_plan(&compiled.plan.config_hash, compiled.plan.node_count());
        let lock = store.acquire_lock(owner).await?;
        debug!("Holding {} ledger lock for run {}", store.backend_type(), lock.run_id);

        let result = Self::apply_locked(compiled, store, applier, &lock).await;

        if let Err(e) = store.release_lock(&lock.run_id).await {
            error!("Failed to release ledger lock of run {}: {e}", lock.run_id);
        }

        result
    }

    async fn apply_locked(
        compiled: &CompiledPlan,
        store: &dyn LedgerStore,
        applier: &Applier,
        lock: &LedgerLock,
    ) -> Result<RunLedger> {
        let previous = store.load().await?;
        let report = ResumeReport::compare(&compiled.plan, previous.as_ref());
        info!("{report}");
        for entry in report.retries() {
            info!(
                "Retrying {} (last run: {})",
                entry.id,
                entry.previous_error.as_deref().unwrap_or("not finished")
            );
        }

        let ledger = RunLedger::new(&compiled.plan.config_hash, previous.as_ref())
            .with_run_id(lock.run_id.clone());
        let ledger = applier.apply_into(&compiled.plan, ledger).await;
        store.save(&ledger).await?;
        Ok(ledger)
    }
}
