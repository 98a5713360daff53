//! Shared create-or-update decision.
//!
//! Each request is projected to a [`ResourceState`]: the managed properties
//! plus tags. An observed resource is projected the same way, so the decision
//! is identical for every client. Tag drift alone never triggers an update.

use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::types::{
    ManagementGroupRequest, PeeringRequest, ProviderRegistrationRequest, ResourceGroupRequest,
    RoleAssignmentRequest, SubnetRequest, SubscriptionRequest, VirtualNetworkRequest,
};

/// Managed properties and tags of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    /// Managed properties, normalized.
    pub properties: Value,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

/// What an ensure call must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureAction {
    /// Resource is absent.
    Create,
    /// Managed properties diverge.
    Update,
    /// Managed properties match.
    Unchanged,
}

/// Decides the action for a resource.
#[must_use]
pub fn decide(existing: Option<&ResourceState>, desired: &ResourceState) -> EnsureAction {
    match existing {
        None => EnsureAction::Create,
        Some(observed) if observed.properties == desired.properties => EnsureAction::Unchanged,
        Some(_) => EnsureAction::Update,
    }
}

/// Normalizes a location the way the control plane reports it.
#[must_use]
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Projection of a request onto its comparable state.
pub trait ManagedState {
    /// Managed properties and tags.
    fn desired_state(&self) -> ResourceState;
}

impl ResourceState {
    /// Creates a state.
    #[must_use]
    pub const fn new(properties: Value, tags: BTreeMap<String, String>) -> Self {
        Self { properties, tags }
    }

    /// State with properties and no tags.
    #[must_use]
    pub const fn untagged(properties: Value) -> Self {
        Self {
            properties,
            tags: BTreeMap::new(),
        }
    }
}

impl ManagedState for SubscriptionRequest {
    // An alias, once created, is only checked for existence.
    fn desired_state(&self) -> ResourceState {
        ResourceState::new(json!({}), self.tags.clone())
    }
}

impl ManagedState for RoleAssignmentRequest {
    fn desired_state(&self) -> ResourceState {
        ResourceState::untagged(json!({
            "principalId": self.principal_id.to_ascii_lowercase(),
            "roleDefinitionId": self.role_definition_id.to_ascii_lowercase(),
        }))
    }
}

impl ManagedState for ManagementGroupRequest {
    fn desired_state(&self) -> ResourceState {
        ResourceState::untagged(json!({}))
    }
}

impl ManagedState for ResourceGroupRequest {
    fn desired_state(&self) -> ResourceState {
        ResourceState::new(
            json!({ "location": normalize_location(&self.location) }),
            self.tags.clone(),
        )
    }
}

impl ManagedState for ProviderRegistrationRequest {
    fn desired_state(&self) -> ResourceState {
        let registered: BTreeMap<String, &str> = self
            .namespaces
            .iter()
            .map(|ns| (ns.to_ascii_lowercase(), "Registered"))
            .collect();
        ResourceState::untagged(json!(registered))
    }
}

impl ManagedState for VirtualNetworkRequest {
    fn desired_state(&self) -> ResourceState {
        ResourceState::new(
            json!({
                "location": normalize_location(&self.location),
                "addressPrefixes": self.address_space,
            }),
            self.tags.clone(),
        )
    }
}

impl ManagedState for SubnetRequest {
    fn desired_state(&self) -> ResourceState {
        ResourceState::untagged(json!({ "addressPrefix": self.address_prefix }))
    }
}

impl ManagedState for PeeringRequest {
    fn desired_state(&self) -> ResourceState {
        ResourceState::untagged(json!({
            "remoteVirtualNetworkId": self.remote_virtual_network_id.to_ascii_lowercase(),
            "allowVirtualNetworkAccess": self.allow_virtual_network_access,
            "allowForwardedTraffic": self.allow_forwarded_traffic,
            "allowGatewayTransit": self.allow_gateway_transit,
            "useRemoteGateways": self.use_remote_gateways,
        }))
    }
}
