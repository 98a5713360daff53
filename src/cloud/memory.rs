//! In-memory cloud.
//!
//! Backs `--simulate` runs and the applier tests. Resources live in a map
//! keyed by lowercased resource id; parents must exist before children, and
//! failures can be injected per resource.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::error::CloudError;
use crate::graph::AccountContext;

use super::client::{CloudClient, CloudResult};
use super::ensure::{EnsureAction, ManagedState, ResourceState, decide};
use super::types::{
    Change, EnsureOutcome, ManagementGroupRequest, PeeringRequest, ProviderRegistrationRequest,
    ResourceGroupRequest, RoleAssignmentRequest, SubnetRequest, SubscriptionRequest,
    VirtualNetworkRequest,
};

type ErrorFactory = Box<dyn Fn() -> CloudError + Send + Sync>;

struct InjectedFailure {
    pattern: String,
    remaining: u32,
    make: ErrorFactory,
}

/// A recorded ensure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Operation name, e.g. `ensure_subnet`.
    pub operation: &'static str,
    /// Target resource id.
    pub resource_id: String,
    /// Account context the call ran under.
    pub context: AccountContext,
}

#[derive(Default)]
struct Inner {
    resources: BTreeMap<String, ResourceState>,
    aliases: BTreeMap<String, String>,
    failures: Vec<InjectedFailure>,
    calls: Vec<CallRecord>,
}

/// In-memory [`CloudClient`].
#[derive(Default)]
pub struct InMemoryCloud {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for InMemoryCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("InMemoryCloud")
            .field("resources", &inner.resources.len())
            .field("aliases", &inner.aliases.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pre-existing resource, e.g. the hub network.
    pub fn seed(&self, resource_id: &str) {
        self.lock()
            .resources
            .insert(resource_id.to_ascii_lowercase(), ResourceState::untagged(serde_json::json!({})));
    }

    /// Registers a pre-existing subscription alias and returns its id.
    pub fn seed_alias(&self, alias: &str) -> String {
        let id = subscription_id_for(alias);
        let mut inner = self.lock();
        inner.aliases.insert(alias.to_string(), id.clone());
        inner.resources.insert(
            format!("/subscriptions/{id}"),
            ResourceState::untagged(serde_json::json!({})),
        );
        id
    }

    /// Makes the next `times` calls touching a resource id containing
    /// `pattern` fail with the error built by `make`.
    pub fn fail_times(
        &self,
        pattern: &str,
        times: u32,
        make: impl Fn() -> CloudError + Send + Sync + 'static,
    ) {
        self.lock().failures.push(InjectedFailure {
            pattern: pattern.to_ascii_lowercase(),
            remaining: times,
            make: Box::new(make),
        });
    }

    /// Replaces the stored state of a resource.
    pub fn overwrite(&self, resource_id: &str, state: ResourceState) {
        self.lock()
            .resources
            .insert(resource_id.to_ascii_lowercase(), state);
    }

    /// Stored state of a resource.
    #[must_use]
    pub fn resource(&self, resource_id: &str) -> Option<ResourceState> {
        self.lock()
            .resources
            .get(&resource_id.to_ascii_lowercase())
            .cloned()
    }

    /// Recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Number of calls that targeted a resource id containing `pattern`.
    #[must_use]
    pub fn call_count(&self, pattern: &str) -> usize {
        let pattern = pattern.to_ascii_lowercase();
        self.lock()
            .calls
            .iter()
            .filter(|c| c.resource_id.to_ascii_lowercase().contains(&pattern))
            .count()
    }

    fn record(&self, operation: &'static str, resource_id: &str, context: AccountContext) -> CloudResult<()> {
        let mut inner = self.lock();
        inner.calls.push(CallRecord {
            operation,
            resource_id: resource_id.to_string(),
            context,
        });

        let key = resource_id.to_ascii_lowercase();
        if let Some(failure) = inner
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && key.contains(&f.pattern))
        {
            failure.remaining -= 1;
            debug!("Injected failure for {resource_id}");
            return Err((failure.make)());
        }
        Ok(())
    }

    fn require(&self, resource_id: &str) -> CloudResult<()> {
        if self
            .lock()
            .resources
            .contains_key(&resource_id.to_ascii_lowercase())
        {
            Ok(())
        } else {
            Err(CloudError::NotFoundYet {
                resource: resource_id.to_string(),
            })
        }
    }

    fn upsert(&self, resource_id: String, mut desired: ResourceState) -> EnsureOutcome {
        let mut inner = self.lock();
        let key = resource_id.to_ascii_lowercase();
        let existing = inner.resources.get(&key);
        let change = match decide(existing, &desired) {
            EnsureAction::Create => Change::Created,
            EnsureAction::Update => Change::Updated,
            EnsureAction::Unchanged => return EnsureOutcome::new(resource_id, Change::Unchanged),
        };
        if let Some(existing) = existing {
            desired.tags.clone_from(&existing.tags);
        }
        inner.resources.insert(key, desired);
        EnsureOutcome::new(resource_id, change)
    }
}

fn subscription_id_for(alias: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, alias.as_bytes()).to_string()
}

fn subscription_resource(subscription_id: &str) -> String {
    format!("/subscriptions/{subscription_id}")
}

#[async_trait]
impl CloudClient for InMemoryCloud {
    async fn ensure_subscription(&self, request: &SubscriptionRequest) -> CloudResult<EnsureOutcome> {
        let alias_id = format!("/providers/Microsoft.Subscription/aliases/{}", request.alias);
        self.record("ensure_subscription", &alias_id, AccountContext::Spoke)?;

        let mut inner = self.lock();
        if let Some(id) = inner.aliases.get(&request.alias) {
            return Ok(EnsureOutcome::new(subscription_resource(id), Change::Unchanged));
        }
        if request.billing_scope.is_none() {
            return Err(CloudError::validation(format!(
                "Alias '{}' does not exist and no billing scope is configured",
                request.alias
            )));
        }

        let id = subscription_id_for(&request.alias);
        inner.aliases.insert(request.alias.clone(), id.clone());
        let resource_id = subscription_resource(&id);
        inner
            .resources
            .insert(resource_id.to_ascii_lowercase(), request.desired_state());
        Ok(EnsureOutcome::new(resource_id, Change::Created))
    }

    async fn ensure_role_assignment(
        &self,
        request: &RoleAssignmentRequest,
    ) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_role_assignment", &resource_id, AccountContext::Spoke)?;
        self.require(&subscription_resource(&request.subscription_id))?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    async fn ensure_management_group_association(
        &self,
        request: &ManagementGroupRequest,
    ) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_management_group_association", &resource_id, AccountContext::Spoke)?;
        self.require(&subscription_resource(&request.subscription_id))?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    async fn ensure_resource_group(&self, request: &ResourceGroupRequest) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_resource_group", &resource_id, AccountContext::Spoke)?;
        self.require(&subscription_resource(&request.subscription_id))?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    async fn ensure_provider_registration(
        &self,
        request: &ProviderRegistrationRequest,
    ) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_provider_registration", &resource_id, AccountContext::Spoke)?;
        self.require(&subscription_resource(&request.subscription_id))?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    async fn ensure_virtual_network(
        &self,
        request: &VirtualNetworkRequest,
    ) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_virtual_network", &resource_id, AccountContext::Spoke)?;
        self.require(&subscription_resource(&request.subscription_id))?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    async fn ensure_subnet(&self, request: &SubnetRequest) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_subnet", &resource_id, AccountContext::Spoke)?;
        self.require(&super::types::network_id(
            &request.subscription_id,
            &request.resource_group_name,
            &request.virtual_network_name,
        ))?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    async fn ensure_peering(
        &self,
        context: AccountContext,
        request: &PeeringRequest,
    ) -> CloudResult<EnsureOutcome> {
        let resource_id = request.resource_id();
        self.record("ensure_peering", &resource_id, context)?;
        self.require(&super::types::network_id(
            &request.subscription_id,
            &request.resource_group_name,
            &request.virtual_network_name,
        ))?;
        self.require(&request.remote_virtual_network_id)?;
        Ok(self.upsert(resource_id, request.desired_state()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(alias: &str, billing: bool) -> SubscriptionRequest {
        SubscriptionRequest {
            alias: alias.to_string(),
            display_name: alias.to_string(),
            workload: crate::config::Workload::Production,
            billing_scope: billing.then(|| String::from("/providers/Microsoft.Billing/x")),
            tags: BTreeMap::new(),
        }
    }

    fn rg(subscription_id: &str, owner: &str) -> ResourceGroupRequest {
        ResourceGroupRequest {
            subscription_id: subscription_id.to_string(),
            name: String::from("rg-a"),
            location: String::from("japaneast"),
            tags: BTreeMap::from([(String::from("owner"), owner.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_subscription_create_then_unchanged() {
        let cloud = InMemoryCloud::new();
        let first = cloud.ensure_subscription(&subscription("sub-a", true)).await.unwrap();
        assert_eq!(first.change, Change::Created);
        assert!(first.resource_id.starts_with("/subscriptions/"));

        let second = cloud.ensure_subscription(&subscription("sub-a", true)).await.unwrap();
        assert_eq!(second.change, Change::Unchanged);
        assert_eq!(first.resource_id, second.resource_id);
    }

    #[tokio::test]
    async fn test_subscription_without_billing_scope() {
        let cloud = InMemoryCloud::new();
        let err = cloud
            .ensure_subscription(&subscription("sub-a", false))
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        cloud.seed_alias("sub-a");
        let adopted = cloud.ensure_subscription(&subscription("sub-a", false)).await.unwrap();
        assert_eq!(adopted.change, Change::Unchanged);
    }

    #[tokio::test]
    async fn test_child_requires_parent() {
        let cloud = InMemoryCloud::new();
        let err = cloud.ensure_resource_group(&rg("missing", "a")).await.unwrap_err();
        assert!(matches!(err, CloudError::NotFoundYet { .. }));
    }

    #[tokio::test]
    async fn test_tag_drift_is_ignored() {
        let cloud = InMemoryCloud::new();
        let id = cloud.seed_alias("sub-a");
        assert_eq!(
            cloud.ensure_resource_group(&rg(&id, "a")).await.unwrap().change,
            Change::Created
        );
        assert_eq!(
            cloud.ensure_resource_group(&rg(&id, "b")).await.unwrap().change,
            Change::Unchanged
        );
    }

    #[tokio::test]
    async fn test_update_keeps_live_tags() {
        let cloud = InMemoryCloud::new();
        let id = cloud.seed_alias("sub-a");
        let created = cloud.ensure_resource_group(&rg(&id, "a")).await.unwrap();

        let mut moved = rg(&id, "b");
        moved.location = String::from("japanwest");
        let updated = cloud.ensure_resource_group(&moved).await.unwrap();
        assert_eq!(updated.change, Change::Updated);

        let stored = cloud.resource(&created.resource_id).unwrap();
        assert_eq!(stored.tags.get("owner").map(String::as_str), Some("a"));
        assert_eq!(stored.properties["location"], "japanwest");
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let cloud = InMemoryCloud::new();
        let id = cloud.seed_alias("sub-a");
        cloud.fail_times("rg-a", 2, || CloudError::network("reset"));

        assert!(cloud.ensure_resource_group(&rg(&id, "a")).await.is_err());
        assert!(cloud.ensure_resource_group(&rg(&id, "a")).await.is_err());
        assert!(cloud.ensure_resource_group(&rg(&id, "a")).await.is_ok());
        assert_eq!(cloud.call_count("rg-a"), 3);
    }
}
