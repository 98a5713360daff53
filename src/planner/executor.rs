//! Plan applier.
//!
//! Batches run in order. Inside a batch, nodes run concurrently up to the
//! configured limit. A node runs only when every dependency reached
//! `Applied`; otherwise it is skipped. Every outcome lands in the run ledger,
//! which is returned whatever happened.

use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cloud::{
    CloudClient, CloudResult, EnsureOutcome, ManagementGroupRequest, PeeringRequest,
    ProviderRegistrationRequest, ResourceGroupRequest, RoleAssignmentRequest, SubnetRequest,
    SubscriptionRequest, VirtualNetworkRequest, subscription_id_from_resource_id,
};
use crate::config::{ApplyConfig, ConfigHasher};
use crate::error::ApplyError;
use crate::graph::{
    AccountContext, DesiredState, NodeId, PeeringDirection, PeeringPayload, ResourceKind,
    ResourceNode,
};
use crate::state::{LedgerRecord, NodeStatus, RunLedger};

use super::plan::ExecutionPlan;
use super::retry::RetryPolicy;

/// Default number of nodes applied at once within a batch.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Reason recorded for nodes that never started because of cancellation.
const CANCELLED: &str = "cancelled";

/// A node's request with every runtime reference filled in.
#[derive(Debug, Clone)]
enum CloudRequest {
    Subscription(SubscriptionRequest),
    RoleAssignment(RoleAssignmentRequest),
    ManagementGroup(ManagementGroupRequest),
    ResourceGroup(ResourceGroupRequest),
    ProviderRegistration(ProviderRegistrationRequest),
    VirtualNetwork(VirtualNetworkRequest),
    Subnet(SubnetRequest),
    Peering(PeeringRequest),
}

/// Applies an [`ExecutionPlan`] through a [`CloudClient`].
#[derive(Clone)]
pub struct Applier {
    client: Arc<dyn CloudClient>,
    concurrency: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier")
            .field("backend", &self.client.backend_type())
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Applier {
    /// Creates an applier with default concurrency and retry policy.
    #[must_use]
    pub fn new(client: Arc<dyn CloudClient>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an applier from the `apply` settings.
    #[must_use]
    pub fn from_config(client: Arc<dyn CloudClient>, config: &ApplyConfig) -> Self {
        Self::new(client)
            .with_concurrency(config.concurrency)
            .with_retry(RetryPolicy::from(config))
    }

    /// Sets the per-batch concurrency limit (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this applier's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Applies the plan and returns the finished ledger.
    ///
    /// History from `previous` is carried into the new ledger. Node failures
    /// never abort the run; call [`RunLedger::ensure_success`] on the result.
    pub async fn apply(&self, plan: &ExecutionPlan, previous: Option<&RunLedger>) -> RunLedger {
        self.apply_into(plan, RunLedger::new(&plan.config_hash, previous))
            .await
    }

    /// Applies the plan, recording into a ledger the caller started.
    pub async fn apply_into(&self, plan: &ExecutionPlan, mut ledger: RunLedger) -> RunLedger {
        let hasher = ConfigHasher::new();
        for (_, node) in plan.ordered_nodes() {
            ledger.push(LedgerRecord::pending(
                &node.id,
                node.target,
                hasher.hash_value(&node.payload),
            ));
        }

        info!(
            "Applying {} nodes in {} batches (concurrency {}, backend {})",
            plan.node_count(),
            plan.batches.len(),
            self.concurrency,
            self.client.backend_type()
        );

        let ledger = Arc::new(Mutex::new(ledger));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        for (index, batch) in plan.batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before batch {}", index + 1);
                break;
            }
            debug!("Starting batch {} with {} nodes", index + 1, batch.len());

            let mut tasks = JoinSet::new();
            for id in batch {
                let Some(node) = plan.node(id) else {
                    continue;
                };

                {
                    let mut guard = ledger.lock().await;
                    if let Some(dep) = node
                        .dependencies
                        .iter()
                        .find(|dep| guard.status(dep) != Some(NodeStatus::Applied))
                    {
                        let reason = format!("dependency {dep} did not apply");
                        warn!("Skipping {id}: {reason}");
                        guard.mark_skipped(id, reason);
                        continue;
                    }
                }

                tasks.spawn(apply_node(
                    node.clone(),
                    Arc::clone(&self.client),
                    Arc::clone(&ledger),
                    Arc::clone(&semaphore),
                    self.cancel.clone(),
                    self.retry,
                ));
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Apply task aborted: {e}");
                }
            }

            let mut guard = ledger.lock().await;
            for id in batch {
                if matches!(
                    guard.status(id),
                    Some(NodeStatus::Pending | NodeStatus::Applying)
                ) {
                    guard.mark_failed(id, String::from("task aborted"), 0);
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let mut ledger = match Arc::try_unwrap(ledger) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };

        if cancelled {
            let pending: Vec<NodeId> = ledger
                .records
                .iter()
                .filter(|r| r.status == NodeStatus::Pending)
                .map(LedgerRecord::node_id)
                .collect();
            for id in &pending {
                ledger.mark_skipped(id, String::from(CANCELLED));
            }
        }
        ledger.finish(cancelled);

        let summary = ledger.summary();
        info!(
            "Run {} finished: {} applied ({} created, {} updated, {} unchanged), {} failed, {} skipped",
            ledger.run_id,
            summary.applied,
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.failed,
            summary.skipped
        );

        ledger
    }
}

/// Applies one node, recording the outcome in the ledger.
async fn apply_node(
    node: ResourceNode,
    client: Arc<dyn CloudClient>,
    ledger: Arc<Mutex<RunLedger>>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    retry: RetryPolicy,
) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };

    let request = {
        let mut guard = ledger.lock().await;
        if cancel.is_cancelled() {
            guard.mark_skipped(&node.id, String::from(CANCELLED));
            return;
        }
        match resolve_request(&node, &guard) {
            Ok(request) => {
                guard.mark_applying(&node.id);
                request
            }
            Err(e) => {
                error!("{}: {e}", node.id);
                guard.mark_failed(&node.id, e.to_string(), 0);
                return;
            }
        }
    };

    info!("Applying {} ({})", node.id, node.payload.display_name());
    let label = node.id.to_string();
    let (result, attempts) = retry
        .run(&label, || dispatch(client.as_ref(), &request, node.target))
        .await;

    let mut guard = ledger.lock().await;
    match result {
        Ok(outcome) => {
            if outcome.change.is_mutation() {
                info!("{}: {} ({})", node.id, outcome.change, outcome.resource_id);
            } else {
                debug!("{}: {} ({})", node.id, outcome.change, outcome.resource_id);
            }
            guard.mark_applied(&node.id, outcome.resource_id, outcome.change, attempts);
        }
        Err(e) => {
            error!("{} failed after {attempts} attempt(s): {e}", node.id);
            guard.mark_failed(&node.id, e.to_string(), attempts);
        }
    }
}

/// Sends a resolved request to the matching client operation.
async fn dispatch(
    client: &dyn CloudClient,
    request: &CloudRequest,
    target: AccountContext,
) -> CloudResult<EnsureOutcome> {
    match request {
        CloudRequest::Subscription(r) => client.ensure_subscription(r).await,
        CloudRequest::RoleAssignment(r) => client.ensure_role_assignment(r).await,
        CloudRequest::ManagementGroup(r) => client.ensure_management_group_association(r).await,
        CloudRequest::ResourceGroup(r) => client.ensure_resource_group(r).await,
        CloudRequest::ProviderRegistration(r) => client.ensure_provider_registration(r).await,
        CloudRequest::VirtualNetwork(r) => client.ensure_virtual_network(r).await,
        CloudRequest::Subnet(r) => client.ensure_subnet(r).await,
        CloudRequest::Peering(r) => client.ensure_peering(target, r).await,
    }
}

/// Builds a node's request from its payload and earlier outputs.
fn resolve_request(node: &ResourceNode, ledger: &RunLedger) -> Result<CloudRequest, ApplyError> {
    let request = match &node.payload {
        DesiredState::Subscription(p) => CloudRequest::Subscription(SubscriptionRequest {
            alias: p.alias.clone(),
            display_name: p.display_name.clone(),
            workload: p.workload,
            billing_scope: p.billing_scope.clone(),
            tags: p.tags.clone(),
        }),
        DesiredState::RoleAssignment(p) => {
            let subscription_id = subscription_id(node, ledger, &p.subscription_key)?;
            CloudRequest::RoleAssignment(RoleAssignmentRequest {
                assignment_name: assignment_name(
                    &subscription_id,
                    &p.principal_id,
                    &p.role_definition_id,
                ),
                subscription_id,
                principal_id: p.principal_id.clone(),
                role_definition_id: p.role_definition_id.clone(),
            })
        }
        DesiredState::ManagementGroupAssociation(p) => {
            CloudRequest::ManagementGroup(ManagementGroupRequest {
                subscription_id: subscription_id(node, ledger, &p.subscription_key)?,
                management_group_id: p.management_group_id.clone(),
            })
        }
        DesiredState::ResourceGroup(p) => CloudRequest::ResourceGroup(ResourceGroupRequest {
            subscription_id: subscription_id(node, ledger, &p.subscription_key)?,
            name: p.name.clone(),
            location: p.location.clone(),
            tags: p.tags.clone(),
        }),
        DesiredState::ProviderRegistration(p) => {
            CloudRequest::ProviderRegistration(ProviderRegistrationRequest {
                subscription_id: subscription_id(node, ledger, &p.subscription_key)?,
                namespaces: p.namespaces.clone(),
            })
        }
        DesiredState::VirtualNetwork(p) => CloudRequest::VirtualNetwork(VirtualNetworkRequest {
            subscription_id: subscription_id(node, ledger, &p.subscription_key)?,
            resource_group_name: p.resource_group_name.clone(),
            name: p.name.clone(),
            location: p.location.clone(),
            address_space: p.address_space.clone(),
            tags: p.tags.clone(),
        }),
        DesiredState::Subnet(p) => CloudRequest::Subnet(SubnetRequest {
            subscription_id: subscription_id(node, ledger, &p.subscription_key)?,
            resource_group_name: p.resource_group_name.clone(),
            virtual_network_name: p.virtual_network_name.clone(),
            name: p.name.clone(),
            address_prefix: p.address_prefix.clone(),
        }),
        DesiredState::Peering(p) => CloudRequest::Peering(peering_request(node, ledger, p)?),
    };
    Ok(request)
}

/// Resolves a peering's holder network and remote network id.
fn peering_request(
    node: &ResourceNode,
    ledger: &RunLedger,
    p: &PeeringPayload,
) -> Result<PeeringRequest, ApplyError> {
    let (subscription_id, resource_group_name, virtual_network_name, remote) = match p.direction
    {
        PeeringDirection::SpokeToHub => (
            subscription_id(node, ledger, &p.subscription_key)?,
            p.spoke_resource_group_name.clone(),
            p.spoke_virtual_network_name.clone(),
            p.hub.id.clone(),
        ),
        PeeringDirection::HubToSpoke => {
            let vnet = NodeId::new(ResourceKind::VirtualNetwork, p.subscription_key.as_str());
            let spoke_id = ledger.resource_id(&vnet).ok_or_else(|| unresolved(node, &format!(
                "resource id of {vnet}"
            )))?;
            (
                p.hub.subscription_id.clone(),
                p.hub.resource_group.clone(),
                p.hub.name.clone(),
                spoke_id.to_string(),
            )
        }
    };

    Ok(PeeringRequest {
        subscription_id,
        resource_group_name,
        virtual_network_name,
        name: p.name.clone(),
        remote_virtual_network_id: remote,
        allow_virtual_network_access: p.allow_virtual_network_access,
        allow_forwarded_traffic: p.allow_forwarded_traffic,
        allow_gateway_transit: p.allow_gateway_transit,
        use_remote_gateways: p.use_remote_gateways,
    })
}

/// Allocated id of the subscription keyed `key`.
fn subscription_id(
    node: &ResourceNode,
    ledger: &RunLedger,
    key: &str,
) -> Result<String, ApplyError> {
    let sub = NodeId::new(ResourceKind::Subscription, key);
    ledger
        .resource_id(&sub)
        .and_then(subscription_id_from_resource_id)
        .map(str::to_string)
        .ok_or_else(|| unresolved(node, &format!("subscription id of {sub}")))
}

fn unresolved(node: &ResourceNode, reference: &str) -> ApplyError {
    ApplyError::UnresolvedReference {
        node: node.id.to_string(),
        reference: reference.to_string(),
    }
}

/// Deterministic role assignment name, stable across runs.
fn assignment_name(subscription_id: &str, principal_id: &str, role_definition_id: &str) -> String {
    let seed = format!("{subscription_id}/{principal_id}/{role_definition_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Change, InMemoryCloud, MockCloudClient};
    use crate::config::{
        ResourceGroupSpec, Settings, SubnetSpec, SubscriptionSpec, VirtualNetworkSpec,
    };
    use crate::error::CloudError;
    use crate::graph::{DependencyGraphBuilder, HubNetwork};
    use crate::planner::Planner;
    use std::collections::BTreeMap;

    const HUB_ID: &str =
        "/subscriptions/hub-sub/resourceGroups/rg-hub/providers/Microsoft.Network/virtualNetworks/vnet-hub";

    fn spoke(key: &str, octet: u8, peering: bool) -> SubscriptionSpec {
        let mut sub = SubscriptionSpec::new(key, format!("Subscription {key}"), "mg-landing");
        sub.resource_groups = Some(BTreeMap::from([(
            String::from("main"),
            ResourceGroupSpec {
                name: format!("rg-{key}"),
                location: None,
                tags: None,
            },
        )]));
        sub.virtual_network = Some(VirtualNetworkSpec {
            name: format!("vnet-{key}"),
            resource_group_name: Some(format!("rg-{key}")),
            address_space: vec![format!("10.{octet}.0.0/16")],
            subnets: vec![SubnetSpec {
                name: String::from("app"),
                address_prefix: format!("10.{octet}.0.0/24"),
            }],
            hub_peering_enabled: peering,
            use_hub_gateway: false,
            location: None,
        });
        sub
    }

    fn plan(subs: Vec<SubscriptionSpec>, with_hub: bool) -> ExecutionPlan {
        let settings = Settings::new("principal-1");
        let hub = HubNetwork::from_resource_id(HUB_ID).unwrap();
        let map = subs.into_iter().map(|s| (s.key.clone(), s)).collect();
        let graph = DependencyGraphBuilder::new(&settings)
            .build(&map, with_hub.then_some(&hub))
            .unwrap();
        Planner::new().plan(graph, "hash-1").unwrap()
    }

    fn applier(cloud: &Arc<InMemoryCloud>) -> Applier {
        let client: Arc<dyn CloudClient> = cloud.clone();
        Applier::new(client).with_retry(RetryPolicy::immediate(5))
    }

    fn id(kind: ResourceKind, key: &str) -> NodeId {
        NodeId::new(kind, key)
    }

    #[tokio::test]
    async fn test_applies_single_subscription_end_to_end() {
        let cloud = Arc::new(InMemoryCloud::new());
        let sub_id = cloud.seed_alias("sub-a");
        cloud.seed(HUB_ID);

        let plan = plan(vec![spoke("sub-a", 1, true)], true);
        let ledger = applier(&cloud).apply(&plan, None).await;

        assert!(ledger.ensure_success().is_ok());
        assert_eq!(ledger.summary().applied, 9);
        assert!(!ledger.cancelled);
        assert!(ledger.finished_at.is_some());

        assert_eq!(
            ledger.resource_id(&id(ResourceKind::Subscription, "sub-a")),
            Some(format!("/subscriptions/{sub_id}").as_str())
        );
        assert_eq!(
            ledger.resource_id(&id(ResourceKind::Subnet, "sub-a-app")),
            Some(
                format!(
                    "/subscriptions/{sub_id}/resourceGroups/rg-sub-a/providers/Microsoft.Network/virtualNetworks/vnet-sub-a/subnets/app"
                )
                .as_str()
            )
        );

        let record = ledger.get(&id(ResourceKind::VirtualNetwork, "sub-a")).unwrap();
        assert_eq!(record.change, Some(Change::Created));
        assert_eq!(record.attempts, 1);
        assert_eq!(record.fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_peering_sides_run_in_their_accounts() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.seed_alias("sub-a");
        cloud.seed(HUB_ID);

        let plan = plan(vec![spoke("sub-a", 1, true)], true);
        let ledger = applier(&cloud).apply(&plan, None).await;
        assert!(ledger.ensure_success().is_ok());

        let peerings: Vec<_> = cloud
            .calls()
            .into_iter()
            .filter(|c| c.operation == "ensure_peering")
            .collect();
        assert_eq!(peerings.len(), 2);
        for call in peerings {
            if call.resource_id.contains("/virtualNetworks/vnet-hub/") {
                assert_eq!(call.context, AccountContext::Connectivity);
                assert!(call.resource_id.ends_with("vnet-hub-to-vnet-sub-a"));
            } else {
                assert_eq!(call.context, AccountContext::Spoke);
                assert!(call.resource_id.ends_with("vnet-sub-a-to-vnet-hub"));
            }
        }
    }

    #[tokio::test]
    async fn test_second_run_is_unchanged() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.seed_alias("sub-a");

        let plan = plan(vec![spoke("sub-a", 1, false)], false);
        let first = applier(&cloud).apply(&plan, None).await;
        let second = applier(&cloud).apply(&plan, Some(&first)).await;

        assert!(second.ensure_success().is_ok());
        let summary = second.summary();
        assert_eq!(summary.unchanged, summary.applied);
        for record in &second.records {
            assert_eq!(record.resource_id, first.get(&record.node_id()).unwrap().resource_id);
            assert_eq!(record.fingerprint, first.get(&record.node_id()).unwrap().fingerprint);
        }
        assert_eq!(second.history.len(), 1);
        assert_eq!(second.history[0].run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.seed_alias("sub-a");
        cloud.fail_times("virtualNetworks/vnet-sub-a", 2, || CloudError::RateLimited {
            retry_after_secs: 0,
        });

        let plan = plan(vec![spoke("sub-a", 1, false)], false);
        let ledger = applier(&cloud).apply(&plan, None).await;

        assert!(ledger.ensure_success().is_ok());
        let vnet = ledger.get(&id(ResourceKind::VirtualNetwork, "sub-a")).unwrap();
        assert_eq!(vnet.status, NodeStatus::Applied);
        assert_eq!(vnet.attempts, 3);
    }

    #[tokio::test]
    async fn test_failed_vnet_skips_dependents_only() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.seed_alias("sub-a");
        cloud.seed_alias("sub-b");
        cloud.fail_times("virtualNetworks/vnet-sub-a", 1, || {
            CloudError::validation("address space overlaps")
        });

        let plan = plan(vec![spoke("sub-a", 1, false), spoke("sub-b", 2, false)], false);
        let ledger = applier(&cloud).apply(&plan, None).await;

        let vnet_a = ledger.get(&id(ResourceKind::VirtualNetwork, "sub-a")).unwrap();
        assert_eq!(vnet_a.status, NodeStatus::Failed);
        assert_eq!(vnet_a.attempts, 1);
        assert_eq!(
            ledger.status(&id(ResourceKind::Subnet, "sub-a-app")),
            Some(NodeStatus::Skipped)
        );
        assert_eq!(
            ledger.status(&id(ResourceKind::Subnet, "sub-b-app")),
            Some(NodeStatus::Applied)
        );

        match ledger.ensure_success() {
            Err(ApplyError::PartialApply {
                failed,
                skipped,
                succeeded,
            }) => {
                assert_eq!(failed, vec!["virtual_network/sub-a"]);
                assert_eq!(skipped, vec!["subnet/sub-a-app"]);
                assert!(succeeded.contains(&String::from("virtual_network/sub-b")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_alias_without_billing_fails() {
        let cloud = Arc::new(InMemoryCloud::new());

        let plan = plan(vec![spoke("sub-a", 1, false)], false);
        let ledger = applier(&cloud).apply(&plan, None).await;

        assert_eq!(
            ledger.status(&id(ResourceKind::Subscription, "sub-a")),
            Some(NodeStatus::Failed)
        );
        assert_eq!(ledger.summary().skipped, plan.node_count() - 1);
        assert_eq!(cloud.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.seed_alias("sub-a");
        let applier = applier(&cloud);
        applier.cancellation_token().cancel();

        let plan = plan(vec![spoke("sub-a", 1, false)], false);
        let ledger = applier.apply(&plan, None).await;

        assert!(ledger.cancelled);
        assert_eq!(ledger.summary().skipped, plan.node_count());
        assert!(cloud.calls().is_empty());
        assert!(matches!(
            ledger.ensure_success(),
            Err(ApplyError::PartialApply { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_mid_run_lets_in_flight_finish() {
        let token = CancellationToken::new();
        let mut client = MockCloudClient::new();
        let cancel = token.clone();
        client.expect_ensure_subscription().times(1).returning(move |_| {
            cancel.cancel();
            Ok(EnsureOutcome::new("/subscriptions/0000", Change::Created))
        });
        client.expect_backend_type().return_const("mock");

        let plan = plan(vec![spoke("sub-a", 1, false)], false);
        let ledger = Applier::new(Arc::new(client))
            .with_retry(RetryPolicy::immediate(1))
            .with_cancellation(token)
            .apply(&plan, None)
            .await;

        assert!(ledger.cancelled);
        assert_eq!(
            ledger.status(&id(ResourceKind::Subscription, "sub-a")),
            Some(NodeStatus::Applied)
        );
        let role = ledger.get(&id(ResourceKind::RoleAssignment, "sub-a")).unwrap();
        assert_eq!(role.status, NodeStatus::Skipped);
        assert_eq!(role.error.as_deref(), Some(CANCELLED));
    }

    #[tokio::test]
    async fn test_role_assignment_name_is_deterministic() {
        let mut client = MockCloudClient::new();
        client
            .expect_ensure_subscription()
            .returning(|_| Ok(EnsureOutcome::new("/subscriptions/abc", Change::Unchanged)));
        client
            .expect_ensure_role_assignment()
            .withf(|r| {
                r.subscription_id == "abc"
                    && r.assignment_name == assignment_name("abc", "principal-1", &r.role_definition_id)
            })
            .returning(|r| Ok(EnsureOutcome::new(r.resource_id(), Change::Created)));
        client
            .expect_ensure_management_group_association()
            .returning(|r| Ok(EnsureOutcome::new(r.resource_id(), Change::Created)));
        client
            .expect_ensure_provider_registration()
            .returning(|r| Ok(EnsureOutcome::new(r.resource_id(), Change::Updated)));
        client.expect_backend_type().return_const("mock");

        let mut sub = SubscriptionSpec::new("sub-a", "Subscription A", "mg-landing");
        sub.tags = BTreeMap::from([(String::from("env"), String::from("dev"))]);
        let ledger = Applier::new(Arc::new(client)).apply(&plan(vec![sub], false), None).await;

        assert!(ledger.ensure_success().is_ok());
        assert_eq!(ledger.summary().updated, 1);
        assert_ne!(assignment_name("abc", "p", "r"), assignment_name("abd", "p", "r"));
    }

    #[test]
    fn test_hub_side_peering_needs_spoke_vnet_id() {
        let plan = plan(vec![spoke("sub-a", 1, true)], true);
        let node = plan
            .node(&id(ResourceKind::Peering, "sub-a-hub-to-spoke"))
            .unwrap();
        let ledger = RunLedger::new("hash-1", None);

        match resolve_request(node, &ledger) {
            Err(ApplyError::UnresolvedReference { node, reference }) => {
                assert_eq!(node, "peering/sub-a-hub-to-spoke");
                assert!(reference.contains("virtual_network/sub-a"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
