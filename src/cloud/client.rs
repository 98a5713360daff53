//! Cloud client trait.
//!
//! Every operation is an idempotent ensure: it creates the resource when
//! absent, updates it when its settings diverge (tags excepted) and reports
//! `Unchanged` otherwise.

use async_trait::async_trait;

use crate::error::CloudError;
use crate::graph::AccountContext;

use super::types::{
    EnsureOutcome, ManagementGroupRequest, PeeringRequest, ProviderRegistrationRequest,
    ResourceGroupRequest, RoleAssignmentRequest, SubnetRequest, SubscriptionRequest,
    VirtualNetworkRequest,
};

/// Result type for cloud calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Control-plane operations used by the applier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Ensures a subscription alias. The resource id is `/subscriptions/{id}`.
    async fn ensure_subscription(&self, request: &SubscriptionRequest) -> CloudResult<EnsureOutcome>;

    /// Ensures a role assignment on a subscription.
    async fn ensure_role_assignment(
        &self,
        request: &RoleAssignmentRequest,
    ) -> CloudResult<EnsureOutcome>;

    /// Ensures a subscription's management group placement.
    async fn ensure_management_group_association(
        &self,
        request: &ManagementGroupRequest,
    ) -> CloudResult<EnsureOutcome>;

    /// Ensures a resource group.
    async fn ensure_resource_group(&self, request: &ResourceGroupRequest) -> CloudResult<EnsureOutcome>;

    /// Ensures resource provider registrations.
    async fn ensure_provider_registration(
        &self,
        request: &ProviderRegistrationRequest,
    ) -> CloudResult<EnsureOutcome>;

    /// Ensures a virtual network.
    async fn ensure_virtual_network(
        &self,
        request: &VirtualNetworkRequest,
    ) -> CloudResult<EnsureOutcome>;

    /// Ensures a subnet.
    async fn ensure_subnet(&self, request: &SubnetRequest) -> CloudResult<EnsureOutcome>;

    /// Ensures a peering, acting in the given account context.
    async fn ensure_peering(
        &self,
        context: AccountContext,
        request: &PeeringRequest,
    ) -> CloudResult<EnsureOutcome>;

    /// Name of the client implementation.
    fn backend_type(&self) -> &'static str;
}
