//! Cloud control-plane integration.
//!
//! This module provides:
//! - The [`CloudClient`] trait used by the applier
//! - A Resource Manager HTTP client
//! - An in-memory cloud for simulation and tests

mod types;
mod client;
mod ensure;
mod arm;
mod memory;

pub use types::{
    Change, EnsureOutcome, ManagementGroupRequest, PeeringRequest, ProviderRegistrationRequest,
    ResourceGroupRequest, RoleAssignmentRequest, SubnetRequest, SubscriptionRequest,
    VirtualNetworkRequest, network_id, subscription_id_from_resource_id,
};
pub use client::{CloudClient, CloudResult};
#[cfg(test)]
pub use client::MockCloudClient;
pub use ensure::{EnsureAction, ManagedState, ResourceState, decide, normalize_location};
pub use arm::ArmClient;
pub use memory::{CallRecord, InMemoryCloud};
