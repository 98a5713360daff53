//! Resource graph module.
//!
//! This module turns loaded configuration into a dependency graph:
//! - Flattening per-subscription collections into global keys
//! - Resolving the hub network
//! - Building resource nodes and their dependency edges

mod node;
mod flatten;
mod hub;
mod builder;

pub use node::{
    AccountContext, DesiredState, ManagementGroupPayload, NodeId, PeeringDirection,
    PeeringPayload, ProviderRegistrationPayload, ResourceGroupPayload, ResourceKind,
    ResourceNode, RoleAssignmentPayload, SubnetPayload, SubscriptionPayload,
    VirtualNetworkPayload,
};
pub use flatten::{
    FlattenedResources, KeyFlattener, PeeringPair, ResolvedResourceGroup, ResolvedSubnet,
    ResolvedVirtualNetwork,
};
pub use hub::{FileHubLookup, HubNetwork, HubTopologyLookup, NoHubLookup, resolve_hub};
#[cfg(test)]
pub use hub::MockHubTopologyLookup;
pub use builder::{DependencyGraphBuilder, ResourceGraph, format_cycle};
