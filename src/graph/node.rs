//! Resource node types.
//!
//! A [`ResourceNode`] is one cloud resource's desired state plus the set of
//! nodes that must be applied before it. Nodes are identified by [`NodeId`],
//! the pair of kind and key; keys are unique within a kind.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::Workload;

use super::hub::HubNetwork;

/// Kind of a resource node.
///
/// Declaration order is the planner's tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Subscription alias.
    Subscription,
    /// Role assignment on the subscription scope.
    RoleAssignment,
    /// Placement of the subscription under a management group.
    ManagementGroupAssociation,
    /// Resource group.
    ResourceGroup,
    /// Resource provider registration.
    ProviderRegistration,
    /// Virtual network.
    VirtualNetwork,
    /// Subnet.
    Subnet,
    /// Virtual network peering.
    Peering,
}

/// Unique identity of a node in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Key, unique within the kind.
    pub key: String,
}

/// Which account context a node is applied under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountContext {
    /// The landing zone's own account, acting on spoke subscriptions.
    #[default]
    Spoke,
    /// The connectivity account that owns the hub network.
    Connectivity,
}

/// Direction of a peering relative to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeeringDirection {
    /// Peering object on the spoke network pointing at the hub.
    SpokeToHub,
    /// Peering object on the hub network pointing at the spoke.
    HubToSpoke,
}

/// Desired state of a subscription alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    /// Alias (the subscription key).
    pub alias: String,
    /// Display name.
    pub display_name: String,
    /// Workload type.
    pub workload: Workload,
    /// Billing scope, when resolvable.
    pub billing_scope: Option<String>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
}

/// Desired state of the subscription role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignmentPayload {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Principal object id.
    pub principal_id: String,
    /// Role definition GUID.
    pub role_definition_id: String,
}

/// Desired management group placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementGroupPayload {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Target management group id.
    pub management_group_id: String,
}

/// Desired state of a resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupPayload {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Resource group name.
    pub name: String,
    /// Resolved location.
    pub location: String,
    /// Resolved tags.
    pub tags: BTreeMap<String, String>,
}

/// Desired provider registrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRegistrationPayload {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Namespaces to register.
    pub namespaces: Vec<String>,
}

/// Desired state of a virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetworkPayload {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Resource group name.
    pub resource_group_name: String,
    /// Network name.
    pub name: String,
    /// Resolved location.
    pub location: String,
    /// Address space CIDRs.
    pub address_space: Vec<String>,
    /// Resolved tags.
    pub tags: BTreeMap<String, String>,
}

/// Desired state of a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetPayload {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Resource group of the parent network.
    pub resource_group_name: String,
    /// Parent network name.
    pub virtual_network_name: String,
    /// Subnet name.
    pub name: String,
    /// Address prefix.
    pub address_prefix: String,
}

/// Desired state of one side of a hub peering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringPayload {
    /// Which side this peering object lives on.
    pub direction: PeeringDirection,
    /// Spoke subscription key.
    pub subscription_key: String,
    /// Peering resource name.
    pub name: String,
    /// Spoke resource group.
    pub spoke_resource_group_name: String,
    /// Spoke network name.
    pub spoke_virtual_network_name: String,
    /// Hub network identity.
    pub hub: HubNetwork,
    /// Allow traffic between the networks.
    pub allow_virtual_network_access: bool,
    /// Allow forwarded traffic.
    pub allow_forwarded_traffic: bool,
    /// Offer this side's gateway to the remote network.
    pub allow_gateway_transit: bool,
    /// Use the remote network's gateway.
    pub use_remote_gateways: bool,
}

/// Desired-state payload, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesiredState {
    /// Subscription alias.
    Subscription(SubscriptionPayload),
    /// Role assignment.
    RoleAssignment(RoleAssignmentPayload),
    /// Management group placement.
    ManagementGroupAssociation(ManagementGroupPayload),
    /// Resource group.
    ResourceGroup(ResourceGroupPayload),
    /// Provider registration.
    ProviderRegistration(ProviderRegistrationPayload),
    /// Virtual network.
    VirtualNetwork(VirtualNetworkPayload),
    /// Subnet.
    Subnet(SubnetPayload),
    /// Peering.
    Peering(PeeringPayload),
}

/// A single provisioning unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// Node identity.
    pub id: NodeId,
    /// Nodes that must be applied first.
    pub dependencies: BTreeSet<NodeId>,
    /// Desired state.
    pub payload: DesiredState,
    /// Account context used to apply the node.
    pub target: AccountContext,
}

impl ResourceKind {
    /// All kinds in priority order.
    pub const ALL: [Self; 8] = [
        Self::Subscription,
        Self::RoleAssignment,
        Self::ManagementGroupAssociation,
        Self::ResourceGroup,
        Self::ProviderRegistration,
        Self::VirtualNetwork,
        Self::Subnet,
        Self::Peering,
    ];

    /// Snake-case name used in keys and output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::RoleAssignment => "role_assignment",
            Self::ManagementGroupAssociation => "management_group_association",
            Self::ResourceGroup => "resource_group",
            Self::ProviderRegistration => "provider_registration",
            Self::VirtualNetwork => "virtual_network",
            Self::Subnet => "subnet",
            Self::Peering => "peering",
        }
    }
}

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl DesiredState {
    /// Kind of resource this payload describes.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Subscription(_) => ResourceKind::Subscription,
            Self::RoleAssignment(_) => ResourceKind::RoleAssignment,
            Self::ManagementGroupAssociation(_) => ResourceKind::ManagementGroupAssociation,
            Self::ResourceGroup(_) => ResourceKind::ResourceGroup,
            Self::ProviderRegistration(_) => ResourceKind::ProviderRegistration,
            Self::VirtualNetwork(_) => ResourceKind::VirtualNetwork,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::Peering(_) => ResourceKind::Peering,
        }
    }

    /// Key of the subscription that owns the resource.
    #[must_use]
    pub fn subscription_key(&self) -> &str {
        match self {
            Self::Subscription(p) => &p.alias,
            Self::RoleAssignment(p) => &p.subscription_key,
            Self::ManagementGroupAssociation(p) => &p.subscription_key,
            Self::ResourceGroup(p) => &p.subscription_key,
            Self::ProviderRegistration(p) => &p.subscription_key,
            Self::VirtualNetwork(p) => &p.subscription_key,
            Self::Subnet(p) => &p.subscription_key,
            Self::Peering(p) => &p.subscription_key,
        }
    }

    /// Short human-readable name of the target resource.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Subscription(p) => p.display_name.clone(),
            Self::RoleAssignment(p) => format!("{} on {}", p.principal_id, p.subscription_key),
            Self::ManagementGroupAssociation(p) => {
                format!("{} -> {}", p.subscription_key, p.management_group_id)
            }
            Self::ResourceGroup(p) => p.name.clone(),
            Self::ProviderRegistration(p) => p.namespaces.join(", "),
            Self::VirtualNetwork(p) => p.name.clone(),
            Self::Subnet(p) => format!("{}/{}", p.virtual_network_name, p.name),
            Self::Peering(p) => p.name.clone(),
        }
    }
}

impl ResourceNode {
    /// Creates a node with no dependencies.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: DesiredState, target: AccountContext) -> Self {
        Self {
            id: NodeId::new(payload.kind(), key),
            dependencies: BTreeSet::new(),
            payload,
            target,
        }
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.dependencies.extend(ids);
        self
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    /// Node key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.id.key
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

impl fmt::Display for AccountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spoke => "spoke",
            Self::Connectivity => "connectivity",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_orders_by_kind_then_key() {
        let mut ids = vec![
            NodeId::new(ResourceKind::Subnet, "a"),
            NodeId::new(ResourceKind::Subscription, "z"),
            NodeId::new(ResourceKind::Subscription, "b"),
            NodeId::new(ResourceKind::Peering, "a"),
            NodeId::new(ResourceKind::RoleAssignment, "a"),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "subscription/b",
                "subscription/z",
                "role_assignment/a",
                "subnet/a",
                "peering/a",
            ]
        );
    }

    #[test]
    fn test_kind_priority_matches_all() {
        let mut sorted = ResourceKind::ALL;
        sorted.sort();
        assert_eq!(sorted, ResourceKind::ALL);
    }
}
