//! Dependency graph assembly.
//!
//! Every subscription contributes a subscription node, its role assignment
//! and management group placement, one node per resource group, a provider
//! registration node, and optionally a network with subnets and two peering
//! nodes. Edges point from a node to the nodes it depends on.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::config::{Settings, SubscriptionSpec};
use crate::error::{ConfigError, GraphError, Result};

use super::flatten::{FlattenedResources, KeyFlattener, PeeringPair, ResolvedVirtualNetwork};
use super::hub::HubNetwork;
use super::node::{
    AccountContext, DesiredState, ManagementGroupPayload, NodeId, PeeringDirection,
    PeeringPayload, ProviderRegistrationPayload, ResourceGroupPayload, ResourceKind,
    ResourceNode, RoleAssignmentPayload, SubnetPayload, SubscriptionPayload,
    VirtualNetworkPayload,
};

/// The assembled resource graph.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<NodeId, ResourceNode>,
}

impl ResourceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node.
    ///
    /// # Errors
    ///
    /// Returns `ConfigConflict` if a node with the same id exists.
    pub fn insert(&mut self, node: ResourceNode) -> Result<()> {
        if let Some(existing) = self.nodes.get(&node.id) {
            return Err(ConfigError::ConfigConflict {
                kind: node.id.kind.to_string(),
                key: node.id.key.clone(),
                first: existing.payload.display_name(),
                second: node.payload.display_name(),
            }
            .into());
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Gets a node.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Returns true if the graph has the node.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Consumes the graph, returning its nodes.
    #[must_use]
    pub fn into_nodes(self) -> BTreeMap<NodeId, ResourceNode> {
        self.nodes
    }

    /// Finds a dependency cycle, returned as a closed path `a, b, .., a`.
    ///
    /// Dependencies on nodes outside the graph are ignored here.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let mut marks = HashMap::new();
        let mut path = Vec::new();
        self.nodes
            .keys()
            .find_map(|id| self.visit(id, &mut marks, &mut path))
    }

    fn visit<'a>(
        &'a self,
        id: &'a NodeId,
        marks: &mut HashMap<&'a NodeId, Mark>,
        path: &mut Vec<&'a NodeId>,
    ) -> Option<Vec<NodeId>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == id)?;
                let mut cycle: Vec<NodeId> = path[start..].iter().map(|n| (*n).clone()).collect();
                cycle.push(id.clone());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(id, Mark::Visiting);
        path.push(id);
        if let Some(node) = self.nodes.get(id) {
            for dep in node.dependencies.iter().filter(|d| self.nodes.contains_key(*d)) {
                if let Some(cycle) = self.visit(dep, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Renders a cycle as `a -> b -> a`.
#[must_use]
pub fn format_cycle(cycle: &[NodeId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Builds the [`ResourceGraph`] from configuration.
#[derive(Debug, Clone, Copy)]
pub struct DependencyGraphBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> DependencyGraphBuilder<'a> {
    /// Creates a builder using the given global settings.
    #[must_use]
    pub const fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a configuration error from flattening, `MissingField` when a
    /// peering has no hub, or `GraphCycle` when the graph is cyclic.
    pub fn build(
        &self,
        subscriptions: &BTreeMap<String, SubscriptionSpec>,
        hub: Option<&HubNetwork>,
    ) -> Result<ResourceGraph> {
        let flat = KeyFlattener::new(&self.settings.default_location).flatten(subscriptions)?;
        let mut graph = ResourceGraph::new();

        for (key, sub) in subscriptions {
            self.add_subscription(&mut graph, key, sub)?;
        }
        Self::add_networks(&mut graph, &flat)?;
        self.add_peerings(&mut graph, &flat, hub)?;

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::GraphCycle {
                cycle: format_cycle(&cycle),
            }
            .into());
        }

        info!("Built resource graph with {} node(s)", graph.len());
        Ok(graph)
    }

    fn add_subscription(
        &self,
        graph: &mut ResourceGraph,
        key: &str,
        sub: &SubscriptionSpec,
    ) -> Result<()> {
        let sub_id = NodeId::new(ResourceKind::Subscription, key);
        let role_id = NodeId::new(ResourceKind::RoleAssignment, key);

        graph.insert(ResourceNode::new(
            key,
            DesiredState::Subscription(SubscriptionPayload {
                alias: key.to_string(),
                display_name: sub.display_name.clone(),
                workload: sub.workload,
                billing_scope: sub.billing_scope.clone(),
                tags: sub.tags.clone(),
            }),
            AccountContext::Spoke,
        ))?;

        let role = &self.settings.role_assignment;
        graph.insert(
            ResourceNode::new(
                key,
                DesiredState::RoleAssignment(RoleAssignmentPayload {
                    subscription_key: key.to_string(),
                    principal_id: role.principal_id.clone(),
                    role_definition_id: role.role_definition_id.clone(),
                }),
                AccountContext::Spoke,
            )
            .depends_on([sub_id.clone()]),
        )?;

        graph.insert(
            ResourceNode::new(
                key,
                DesiredState::ManagementGroupAssociation(ManagementGroupPayload {
                    subscription_key: key.to_string(),
                    management_group_id: sub.management_group_id.clone(),
                }),
                AccountContext::Spoke,
            )
            .depends_on([sub_id.clone(), role_id.clone()]),
        )?;

        graph.insert(
            ResourceNode::new(
                key,
                DesiredState::ProviderRegistration(ProviderRegistrationPayload {
                    subscription_key: key.to_string(),
                    namespaces: self.settings.provider_namespaces(),
                }),
                AccountContext::Spoke,
            )
            .depends_on([sub_id, role_id]),
        )?;

        debug!("Added subscription nodes for '{key}'");
        Ok(())
    }

    fn add_networks(graph: &mut ResourceGraph, flat: &FlattenedResources) -> Result<()> {
        for (key, rg) in &flat.resource_groups {
            graph.insert(
                ResourceNode::new(
                    key.as_str(),
                    DesiredState::ResourceGroup(ResourceGroupPayload {
                        subscription_key: rg.subscription_key.clone(),
                        name: rg.name.clone(),
                        location: rg.location.clone(),
                        tags: rg.tags.clone(),
                    }),
                    AccountContext::Spoke,
                )
                .depends_on(Self::subscription_deps(&rg.subscription_key)),
            )?;
        }

        for (key, vnet) in &flat.virtual_networks {
            graph.insert(
                ResourceNode::new(
                    key.as_str(),
                    DesiredState::VirtualNetwork(VirtualNetworkPayload {
                        subscription_key: vnet.subscription_key.clone(),
                        resource_group_name: vnet.resource_group_name.clone(),
                        name: vnet.name.clone(),
                        location: vnet.location.clone(),
                        address_space: vnet.address_space.clone(),
                        tags: vnet.tags.clone(),
                    }),
                    AccountContext::Spoke,
                )
                .depends_on(Self::vnet_deps(vnet)),
            )?;
        }

        for (key, subnet) in &flat.subnets {
            graph.insert(
                ResourceNode::new(
                    key.as_str(),
                    DesiredState::Subnet(SubnetPayload {
                        subscription_key: subnet.subscription_key.clone(),
                        resource_group_name: subnet.resource_group_name.clone(),
                        virtual_network_name: subnet.virtual_network_name.clone(),
                        name: subnet.name.clone(),
                        address_prefix: subnet.address_prefix.clone(),
                    }),
                    AccountContext::Spoke,
                )
                .depends_on([NodeId::new(
                    ResourceKind::VirtualNetwork,
                    subnet.subscription_key.as_str(),
                )]),
            )?;
        }

        Ok(())
    }

    fn add_peerings(
        &self,
        graph: &mut ResourceGraph,
        flat: &FlattenedResources,
        hub: Option<&HubNetwork>,
    ) -> Result<()> {
        if flat.peerings.is_empty() {
            return Ok(());
        }

        let Some(hub) = hub else {
            let first = flat.peerings.keys().next().map_or("", String::as_str);
            return Err(ConfigError::missing(
                format!("subscriptions.{first}.virtual_network"),
                "hub",
            )
            .into());
        };

        // A spoke that is itself the hub would peer with itself.
        if let Some((key, _)) = flat
            .peerings
            .iter()
            .find(|(_, p)| hub.is_network(&p.resource_group_name, &p.virtual_network_name))
        {
            let vnet = NodeId::new(ResourceKind::VirtualNetwork, key.as_str());
            let peering = NodeId::new(ResourceKind::Peering, format!("{key}-spoke-to-hub"));
            return Err(GraphError::GraphCycle {
                cycle: format_cycle(&[peering.clone(), vnet, peering]),
            }
            .into());
        }

        // When the hub network is itself declared here, peer only after it exists.
        let managed_hub = flat
            .virtual_networks
            .iter()
            .find(|(_, v)| hub.is_network(&v.resource_group_name, &v.name))
            .map(|(key, _)| NodeId::new(ResourceKind::VirtualNetwork, key.as_str()));

        for (key, pair) in &flat.peerings {
            let mut deps = vec![NodeId::new(ResourceKind::VirtualNetwork, key.as_str())];
            deps.extend(managed_hub.clone());

            graph.insert(
                ResourceNode::new(
                    format!("{key}-spoke-to-hub"),
                    DesiredState::Peering(peering_payload(pair, hub, PeeringDirection::SpokeToHub)),
                    AccountContext::Spoke,
                )
                .depends_on(deps.clone()),
            )?;
            graph.insert(
                ResourceNode::new(
                    format!("{key}-hub-to-spoke"),
                    DesiredState::Peering(peering_payload(pair, hub, PeeringDirection::HubToSpoke)),
                    AccountContext::Connectivity,
                )
                .depends_on(deps),
            )?;
        }

        Ok(())
    }

    fn subscription_deps(subscription_key: &str) -> [NodeId; 2] {
        [
            NodeId::new(ResourceKind::Subscription, subscription_key),
            NodeId::new(ResourceKind::RoleAssignment, subscription_key),
        ]
    }

    fn vnet_deps(vnet: &ResolvedVirtualNetwork) -> Vec<NodeId> {
        let sub = vnet.subscription_key.as_str();
        let mut deps = vec![
            NodeId::new(ResourceKind::Subscription, sub),
            NodeId::new(ResourceKind::ProviderRegistration, sub),
        ];
        if let Some(rg_key) = &vnet.resource_group_key {
            deps.push(NodeId::new(ResourceKind::ResourceGroup, rg_key.as_str()));
        }
        deps
    }
}

fn peering_payload(
    pair: &PeeringPair,
    hub: &HubNetwork,
    direction: PeeringDirection,
) -> PeeringPayload {
    let (name, allow_gateway_transit, use_remote_gateways) = match direction {
        PeeringDirection::SpokeToHub => (
            format!("{}-to-{}", pair.virtual_network_name, hub.name),
            false,
            pair.use_hub_gateway,
        ),
        PeeringDirection::HubToSpoke => (
            format!("{}-to-{}", hub.name, pair.virtual_network_name),
            pair.use_hub_gateway,
            false,
        ),
    };
    PeeringPayload {
        direction,
        subscription_key: pair.subscription_key.clone(),
        name,
        spoke_resource_group_name: pair.resource_group_name.clone(),
        spoke_virtual_network_name: pair.virtual_network_name.clone(),
        hub: hub.clone(),
        allow_virtual_network_access: true,
        allow_forwarded_traffic: true,
        allow_gateway_transit,
        use_remote_gateways,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceGroupSpec, SubnetSpec, VirtualNetworkSpec};
    use crate::error::LandingZoneError;
    use std::collections::BTreeSet;

    const HUB_ID: &str =
        "/subscriptions/hub/resourceGroups/rg-hub/providers/Microsoft.Network/virtualNetworks/vnet-hub";

    fn hub() -> HubNetwork {
        HubNetwork::from_resource_id(HUB_ID).unwrap()
    }

    fn sub_a(peering: bool, use_gateway: bool) -> SubscriptionSpec {
        let mut a = SubscriptionSpec::new("sub-a", "Subscription A", "mg-landing");
        a.resource_groups = Some(BTreeMap::from([(
            String::from("main"),
            ResourceGroupSpec {
                name: String::from("rg-a"),
                location: None,
                tags: None,
            },
        )]));
        a.virtual_network = Some(VirtualNetworkSpec {
            name: String::from("vnet-a"),
            resource_group_name: Some(String::from("rg-a")),
            address_space: vec![String::from("10.1.0.0/16")],
            subnets: vec![SubnetSpec {
                name: String::from("app"),
                address_prefix: String::from("10.1.0.0/24"),
            }],
            hub_peering_enabled: peering,
            use_hub_gateway: use_gateway,
            location: None,
        });
        a
    }

    fn build(
        subs: Vec<SubscriptionSpec>,
        hub: Option<&HubNetwork>,
    ) -> Result<ResourceGraph> {
        let settings = Settings::new("principal-1");
        let map = subs.into_iter().map(|s| (s.key.clone(), s)).collect();
        DependencyGraphBuilder::new(&settings).build(&map, hub)
    }

    fn id(kind: ResourceKind, key: &str) -> NodeId {
        NodeId::new(kind, key)
    }

    fn deps(graph: &ResourceGraph, kind: ResourceKind, key: &str) -> BTreeSet<NodeId> {
        graph.get(&id(kind, key)).unwrap().dependencies.clone()
    }

    #[test]
    fn test_full_subscription_graph() {
        let hub = hub();
        let graph = build(vec![sub_a(true, false)], Some(&hub)).unwrap();

        let ids: Vec<String> = graph.nodes().map(|n| n.id.to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "subscription/sub-a",
                "role_assignment/sub-a",
                "management_group_association/sub-a",
                "resource_group/sub-a-main",
                "provider_registration/sub-a",
                "virtual_network/sub-a",
                "subnet/sub-a-app",
                "peering/sub-a-hub-to-spoke",
                "peering/sub-a-spoke-to-hub",
            ]
        );

        assert_eq!(
            deps(&graph, ResourceKind::ManagementGroupAssociation, "sub-a"),
            BTreeSet::from([
                id(ResourceKind::Subscription, "sub-a"),
                id(ResourceKind::RoleAssignment, "sub-a"),
            ])
        );
        assert_eq!(
            deps(&graph, ResourceKind::VirtualNetwork, "sub-a"),
            BTreeSet::from([
                id(ResourceKind::Subscription, "sub-a"),
                id(ResourceKind::ResourceGroup, "sub-a-main"),
                id(ResourceKind::ProviderRegistration, "sub-a"),
            ])
        );
        assert_eq!(
            deps(&graph, ResourceKind::Subnet, "sub-a-app"),
            BTreeSet::from([id(ResourceKind::VirtualNetwork, "sub-a")])
        );
    }

    #[test]
    fn test_network_provider_always_registered() {
        let mut settings = Settings::new("principal-1");
        settings.resource_providers = Vec::new();
        let map = BTreeMap::from([(String::from("sub-a"), sub_a(false, false))]);
        let graph = DependencyGraphBuilder::new(&settings).build(&map, None).unwrap();

        assert!(deps(&graph, ResourceKind::VirtualNetwork, "sub-a")
            .contains(&id(ResourceKind::ProviderRegistration, "sub-a")));
        let node = graph.get(&id(ResourceKind::ProviderRegistration, "sub-a")).unwrap();
        let DesiredState::ProviderRegistration(p) = &node.payload else {
            panic!("expected provider registration payload");
        };
        assert_eq!(p.namespaces, vec!["Microsoft.Network"]);

        settings.resource_providers = vec![
            String::from("Microsoft.Compute"),
            String::from("microsoft.network"),
        ];
        let graph = DependencyGraphBuilder::new(&settings).build(&map, None).unwrap();
        let node = graph.get(&id(ResourceKind::ProviderRegistration, "sub-a")).unwrap();
        let DesiredState::ProviderRegistration(p) = &node.payload else {
            panic!("expected provider registration payload");
        };
        assert_eq!(p.namespaces, vec!["Microsoft.Network", "Microsoft.Compute"]);
    }

    #[test]
    fn test_peering_flags_with_gateway() {
        let hub = hub();
        let graph = build(vec![sub_a(true, true)], Some(&hub)).unwrap();

        let spoke = graph.get(&id(ResourceKind::Peering, "sub-a-spoke-to-hub")).unwrap();
        assert_eq!(spoke.target, AccountContext::Spoke);
        let DesiredState::Peering(p) = &spoke.payload else {
            panic!("expected peering payload");
        };
        assert_eq!(p.name, "vnet-a-to-vnet-hub");
        assert!(p.use_remote_gateways);
        assert!(!p.allow_gateway_transit);
        assert!(p.allow_virtual_network_access && p.allow_forwarded_traffic);

        let hub_side = graph.get(&id(ResourceKind::Peering, "sub-a-hub-to-spoke")).unwrap();
        assert_eq!(hub_side.target, AccountContext::Connectivity);
        let DesiredState::Peering(p) = &hub_side.payload else {
            panic!("expected peering payload");
        };
        assert_eq!(p.name, "vnet-hub-to-vnet-a");
        assert!(p.allow_gateway_transit);
        assert!(!p.use_remote_gateways);
    }

    #[test]
    fn test_peering_flags_without_gateway() {
        let hub = hub();
        let graph = build(vec![sub_a(true, false)], Some(&hub)).unwrap();
        for key in ["sub-a-spoke-to-hub", "sub-a-hub-to-spoke"] {
            let node = graph.get(&id(ResourceKind::Peering, key)).unwrap();
            let DesiredState::Peering(p) = &node.payload else {
                panic!("expected peering payload");
            };
            assert!(!p.use_remote_gateways);
            assert!(!p.allow_gateway_transit);
        }
    }

    #[test]
    fn test_no_peering_without_flag() {
        let graph = build(vec![sub_a(false, false)], None).unwrap();
        assert_eq!(graph.len(), 7);
        assert!(graph.nodes().all(|n| n.kind() != ResourceKind::Peering));
    }

    #[test]
    fn test_peering_requires_hub() {
        let err = build(vec![sub_a(true, false)], None).unwrap_err();
        match err {
            LandingZoneError::Config(ConfigError::MissingField { field, .. }) => {
                assert_eq!(field, "hub");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_peering_is_a_cycle() {
        let hub = HubNetwork::from_resource_id(
            "/subscriptions/x/resourceGroups/rg-a/providers/Microsoft.Network/virtualNetworks/vnet-a",
        )
        .unwrap();
        let err = build(vec![sub_a(true, false)], Some(&hub)).unwrap_err();
        assert!(matches!(
            err,
            LandingZoneError::Graph(GraphError::GraphCycle { .. })
        ));
    }

    #[test]
    fn test_managed_hub_orders_peerings() {
        let mut hub_sub = SubscriptionSpec::new("connectivity", "Hub", "mg-platform");
        hub_sub.virtual_network = Some(VirtualNetworkSpec {
            name: String::from("vnet-hub"),
            resource_group_name: Some(String::from("rg-hub")),
            address_space: vec![String::from("10.0.0.0/16")],
            subnets: Vec::new(),
            hub_peering_enabled: false,
            use_hub_gateway: false,
            location: None,
        });
        let hub = hub();
        let graph = build(vec![sub_a(true, false), hub_sub], Some(&hub)).unwrap();
        assert!(
            deps(&graph, ResourceKind::Peering, "sub-a-hub-to-spoke")
                .contains(&id(ResourceKind::VirtualNetwork, "connectivity"))
        );
    }

    #[test]
    fn test_find_cycle() {
        let a = id(ResourceKind::Subnet, "a");
        let b = id(ResourceKind::Subnet, "b");
        let payload = |name: &str| {
            DesiredState::Subnet(SubnetPayload {
                subscription_key: String::from("s"),
                resource_group_name: String::from("rg"),
                virtual_network_name: String::from("v"),
                name: name.to_string(),
                address_prefix: String::from("10.0.0.0/24"),
            })
        };
        let mut graph = ResourceGraph::new();
        graph
            .insert(ResourceNode::new("a", payload("a"), AccountContext::Spoke).depends_on([b.clone()]))
            .unwrap();
        graph
            .insert(ResourceNode::new("b", payload("b"), AccountContext::Spoke).depends_on([a]))
            .unwrap();
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(format_cycle(&cycle), "subnet/a -> subnet/b -> subnet/a");
    }

    #[test]
    fn test_duplicate_node_conflict() {
        let payload = DesiredState::Subnet(SubnetPayload {
            subscription_key: String::from("s"),
            resource_group_name: String::from("rg"),
            virtual_network_name: String::from("v"),
            name: String::from("a"),
            address_prefix: String::from("10.0.0.0/24"),
        });
        let mut graph = ResourceGraph::new();
        graph
            .insert(ResourceNode::new("a", payload.clone(), AccountContext::Spoke))
            .unwrap();
        assert!(
            graph
                .insert(ResourceNode::new("a", payload, AccountContext::Spoke))
                .is_err()
        );
    }
}
