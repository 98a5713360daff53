//! Cloud request and outcome types.
//!
//! Requests are fully resolved: every runtime reference (subscription id,
//! remote network id) has already been filled from earlier outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Workload;

/// What an ensure call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    /// The resource did not exist and was created.
    Created,
    /// The resource existed with different settings and was updated.
    Updated,
    /// The resource already matched.
    Unchanged,
}

/// Result of an ensure call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsureOutcome {
    /// Resource id of the ensured resource.
    pub resource_id: String,
    /// What changed.
    pub change: Change,
}

/// Ensure a subscription alias exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Alias name.
    pub alias: String,
    /// Display name.
    pub display_name: String,
    /// Workload type.
    pub workload: Workload,
    /// Billing scope; `None` only adopts an existing alias.
    pub billing_scope: Option<String>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

/// Ensure a role assignment on a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleAssignmentRequest {
    /// Subscription id.
    pub subscription_id: String,
    /// Deterministic assignment name (GUID).
    pub assignment_name: String,
    /// Principal object id.
    pub principal_id: String,
    /// Role definition GUID.
    pub role_definition_id: String,
}

/// Ensure a subscription sits under a management group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagementGroupRequest {
    /// Subscription id.
    pub subscription_id: String,
    /// Management group id.
    pub management_group_id: String,
}

/// Ensure a resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceGroupRequest {
    /// Subscription id.
    pub subscription_id: String,
    /// Resource group name.
    pub name: String,
    /// Location.
    pub location: String,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

/// Ensure resource providers are registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRegistrationRequest {
    /// Subscription id.
    pub subscription_id: String,
    /// Namespaces to register.
    pub namespaces: Vec<String>,
}

/// Ensure a virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualNetworkRequest {
    /// Subscription id.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group_name: String,
    /// Network name.
    pub name: String,
    /// Location.
    pub location: String,
    /// Address space CIDRs.
    pub address_space: Vec<String>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

/// Ensure a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetRequest {
    /// Subscription id.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group_name: String,
    /// Parent network name.
    pub virtual_network_name: String,
    /// Subnet name.
    pub name: String,
    /// Address prefix.
    pub address_prefix: String,
}

/// Ensure a peering object on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeeringRequest {
    /// Subscription id of the network holding the peering.
    pub subscription_id: String,
    /// Resource group of the network holding the peering.
    pub resource_group_name: String,
    /// Network holding the peering.
    pub virtual_network_name: String,
    /// Peering name.
    pub name: String,
    /// Resource id of the remote network.
    pub remote_virtual_network_id: String,
    /// Allow traffic between the networks.
    pub allow_virtual_network_access: bool,
    /// Allow forwarded traffic.
    pub allow_forwarded_traffic: bool,
    /// Offer this side's gateway.
    pub allow_gateway_transit: bool,
    /// Use the remote gateway.
    pub use_remote_gateways: bool,
}

impl Change {
    /// Returns true if the call mutated the cloud.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

impl EnsureOutcome {
    /// Creates an outcome.
    #[must_use]
    pub fn new(resource_id: impl Into<String>, change: Change) -> Self {
        Self {
            resource_id: resource_id.into(),
            change,
        }
    }
}

impl RoleAssignmentRequest {
    /// Role assignment resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleAssignments/{}",
            self.subscription_id, self.assignment_name
        )
    }

    /// Role definition resource id.
    #[must_use]
    pub fn role_definition_resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            self.subscription_id, self.role_definition_id
        )
    }
}

impl ManagementGroupRequest {
    /// Association resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "/providers/Microsoft.Management/managementGroups/{}/subscriptions/{}",
            self.management_group_id, self.subscription_id
        )
    }
}

impl ResourceGroupRequest {
    /// Resource group resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.name
        )
    }
}

impl ProviderRegistrationRequest {
    /// Providers collection id for the subscription.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!("/subscriptions/{}/providers", self.subscription_id)
    }
}

impl VirtualNetworkRequest {
    /// Virtual network resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        network_id(&self.subscription_id, &self.resource_group_name, &self.name)
    }
}

impl SubnetRequest {
    /// Subnet resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "{}/subnets/{}",
            network_id(
                &self.subscription_id,
                &self.resource_group_name,
                &self.virtual_network_name
            ),
            self.name
        )
    }
}

impl PeeringRequest {
    /// Peering resource id.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "{}/virtualNetworkPeerings/{}",
            network_id(
                &self.subscription_id,
                &self.resource_group_name,
                &self.virtual_network_name
            ),
            self.name
        )
    }
}

/// Builds a virtual network resource id.
#[must_use]
pub fn network_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{name}"
    )
}

/// Extracts the subscription id from `/subscriptions/{id}`.
#[must_use]
pub fn subscription_id_from_resource_id(resource_id: &str) -> Option<&str> {
    resource_id
        .strip_prefix("/subscriptions/")
        .map(|rest| rest.split('/').next().unwrap_or(rest))
        .filter(|id| !id.is_empty())
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_id_extraction() {
        assert_eq!(subscription_id_from_resource_id("/subscriptions/abc"), Some("abc"));
        assert_eq!(
            subscription_id_from_resource_id("/subscriptions/abc/resourceGroups/rg"),
            Some("abc")
        );
        assert_eq!(subscription_id_from_resource_id("/subscriptions/"), None);
        assert_eq!(subscription_id_from_resource_id("abc"), None);
    }

    #[test]
    fn test_peering_resource_id() {
        let req = PeeringRequest {
            subscription_id: String::from("s1"),
            resource_group_name: String::from("rg"),
            virtual_network_name: String::from("vnet"),
            name: String::from("vnet-to-hub"),
            remote_virtual_network_id: String::new(),
            allow_virtual_network_access: true,
            allow_forwarded_traffic: true,
            allow_gateway_transit: false,
            use_remote_gateways: false,
        };
        assert_eq!(
            req.resource_id(),
            "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/virtualNetworkPeerings/vnet-to-hub"
        );
    }
}
