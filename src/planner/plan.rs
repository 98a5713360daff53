//! Execution plan types and construction.
//!
//! The planner layers the resource graph into batches: every node in a batch
//! depends only on nodes in earlier batches. Within a batch nodes are ordered
//! by kind priority, then key, so the same configuration always produces the
//! same plan.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::graph::{NodeId, ResourceGraph, ResourceKind, ResourceNode, format_cycle};

/// An ordered, batched execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Batches in execution order.
    pub batches: Vec<Vec<NodeId>>,
    nodes: BTreeMap<NodeId, ResourceNode>,
}

/// Builds [`ExecutionPlan`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner;

impl Planner {
    /// Creates a planner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Layers the graph into batches.
    ///
    /// # Errors
    ///
    /// Returns `UnsatisfiableGraph` if a dependency is not in the graph and
    /// `GraphCycle` if some nodes can never become ready.
    pub fn plan(&self, graph: ResourceGraph, config_hash: &str) -> Result<ExecutionPlan> {
        for node in graph.nodes() {
            if let Some(missing) = node.dependencies.iter().find(|d| !graph.contains(d)) {
                return Err(GraphError::UnsatisfiableGraph {
                    missing: missing.to_string(),
                    referrer: node.id.to_string(),
                }
                .into());
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::GraphCycle {
                cycle: format_cycle(&cycle),
            }
            .into());
        }

        let nodes = graph.into_nodes();
        let mut remaining: BTreeMap<&NodeId, usize> = nodes
            .values()
            .map(|n| (&n.id, n.dependencies.len()))
            .collect();
        let mut dependents: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();
        for node in nodes.values() {
            for dep in &node.dependencies {
                dependents.entry(dep).or_default().push(&node.id);
            }
        }

        let mut ready: BTreeSet<&NodeId> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut batches: Vec<Vec<NodeId>> = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            let batch: Vec<&NodeId> = std::mem::take(&mut ready).into_iter().collect();
            for id in &batch {
                remaining.remove(*id);
                for dependent in dependents.get(*id).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(*dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(*dependent);
                        }
                    }
                }
            }
            placed += batch.len();
            debug!("Batch {}: {} node(s)", batches.len(), batch.len());
            batches.push(batch.into_iter().cloned().collect::<Vec<NodeId>>());
        }

        if placed != nodes.len() {
            let stuck: Vec<String> = remaining.keys().map(ToString::to_string).collect();
            return Err(GraphError::GraphCycle {
                cycle: stuck.join(" -> "),
            }
            .into());
        }

        info!(
            "Planned {} node(s) in {} batch(es)",
            nodes.len(),
            batches.len()
        );

        Ok(ExecutionPlan {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            batches,
            nodes,
        })
    }
}

impl ExecutionPlan {
    /// Returns true if the plan has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Gets a node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Iterates nodes in execution order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = (usize, &ResourceNode)> {
        self.batches.iter().enumerate().flat_map(move |(i, batch)| {
            batch
                .iter()
                .filter_map(move |id| self.nodes.get(id).map(|n| (i, n)))
        })
    }

    /// Index of the batch containing a node.
    #[must_use]
    pub fn batch_of(&self, id: &NodeId) -> Option<usize> {
        self.batches.iter().position(|b| b.contains(id))
    }

    /// Number of nodes of each kind.
    #[must_use]
    pub fn kind_counts(&self) -> BTreeMap<ResourceKind, usize> {
        let mut counts = BTreeMap::new();
        for id in self.nodes.keys() {
            *counts.entry(id.kind).or_insert(0) += 1;
        }
        counts
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.nodes.is_empty() {
            return write!(f, "Nothing to provision");
        }

        writeln!(
            f,
            "Execution Plan ({} nodes, {} batches):",
            self.nodes.len(),
            self.batches.len()
        )?;
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(f, "  batch {i}:")?;
            for id in batch {
                writeln!(f, "    - {id}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceGroupSpec, Settings, SubnetSpec, SubscriptionSpec, VirtualNetworkSpec};
    use crate::error::LandingZoneError;
    use crate::graph::{AccountContext, DependencyGraphBuilder, DesiredState, HubNetwork, SubnetPayload};

    fn subnet(key: &str, deps: &[&str]) -> ResourceNode {
        ResourceNode::new(
            key,
            DesiredState::Subnet(SubnetPayload {
                subscription_key: String::from("s"),
                resource_group_name: String::from("rg"),
                virtual_network_name: String::from("v"),
                name: key.to_string(),
                address_prefix: String::from("10.0.0.0/24"),
            }),
            AccountContext::Spoke,
        )
        .depends_on(deps.iter().map(|d| NodeId::new(ResourceKind::Subnet, *d)))
    }

    fn graph(nodes: Vec<ResourceNode>) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for n in nodes {
            g.insert(n).unwrap();
        }
        g
    }

    fn rendered(plan: &ExecutionPlan) -> Vec<Vec<String>> {
        plan.batches
            .iter()
            .map(|b| b.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn test_layers_by_dependencies() {
        let plan = Planner::new()
            .plan(
                graph(vec![
                    subnet("c", &["a", "b"]),
                    subnet("b", &["a"]),
                    subnet("a", &[]),
                    subnet("d", &[]),
                ]),
                "hash",
            )
            .unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                vec!["subnet/a", "subnet/d"],
                vec!["subnet/b"],
                vec!["subnet/c"],
            ]
        );
        assert_eq!(plan.batch_of(&NodeId::new(ResourceKind::Subnet, "c")), Some(2));
    }

    #[test]
    fn test_missing_dependency() {
        let err = Planner::new()
            .plan(graph(vec![subnet("a", &["ghost"])]), "hash")
            .unwrap_err();
        match err {
            LandingZoneError::Graph(GraphError::UnsatisfiableGraph { missing, referrer }) => {
                assert_eq!(missing, "subnet/ghost");
                assert_eq!(referrer, "subnet/a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Planner::new()
            .plan(graph(vec![subnet("a", &["b"]), subnet("b", &["a"])]), "hash")
            .unwrap_err();
        assert!(matches!(err, LandingZoneError::Graph(GraphError::GraphCycle { .. })));
    }

    #[test]
    fn test_empty_graph() {
        let plan = Planner::new().plan(ResourceGraph::new(), "hash").unwrap();
        assert!(plan.is_empty());
        assert!(plan.batches.is_empty());
    }

    #[test]
    fn test_single_subscription_plan() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        sub.resource_groups = Some(BTreeMap::from([(
            String::from("main"),
            ResourceGroupSpec {
                name: String::from("rg-a"),
                location: None,
                tags: None,
            },
        )]));
        sub.virtual_network = Some(VirtualNetworkSpec {
            name: String::from("vnet-a"),
            resource_group_name: Some(String::from("rg-a")),
            address_space: vec![String::from("10.1.0.0/16")],
            subnets: vec![SubnetSpec {
                name: String::from("app"),
                address_prefix: String::from("10.1.0.0/24"),
            }],
            hub_peering_enabled: true,
            use_hub_gateway: false,
            location: None,
        });
        let hub = HubNetwork::from_resource_id(
            "/subscriptions/h/resourceGroups/rg-hub/providers/Microsoft.Network/virtualNetworks/vnet-hub",
        )
        .unwrap();
        let settings = Settings::new("principal");
        let subs = BTreeMap::from([(sub.key.clone(), sub)]);
        let g = DependencyGraphBuilder::new(&settings)
            .build(&subs, Some(&hub))
            .unwrap();

        let plan = Planner::new().plan(g, "hash").unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                vec!["subscription/sub-a"],
                vec!["role_assignment/sub-a"],
                vec![
                    "management_group_association/sub-a",
                    "resource_group/sub-a-main",
                    "provider_registration/sub-a",
                ],
                vec!["virtual_network/sub-a"],
                vec![
                    "subnet/sub-a-app",
                    "peering/sub-a-hub-to-spoke",
                    "peering/sub-a-spoke-to-hub",
                ],
            ]
        );
        assert_eq!(plan.node_count(), 9);
        assert_eq!(plan.kind_counts()[&ResourceKind::Peering], 2);
    }

    #[test]
    fn test_subscription_without_resource_groups() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        sub.virtual_network = Some(VirtualNetworkSpec {
            name: String::from("vnet-a"),
            resource_group_name: Some(String::from("rg-network")),
            address_space: vec![String::from("10.0.0.0/16")],
            subnets: vec![SubnetSpec {
                name: String::from("subnet1"),
                address_prefix: String::from("10.0.1.0/24"),
            }],
            hub_peering_enabled: true,
            use_hub_gateway: false,
            location: None,
        });
        assert!(sub.resource_groups.is_none());
        let hub = HubNetwork::from_resource_id(
            "/subscriptions/h/resourceGroups/rg-hub/providers/Microsoft.Network/virtualNetworks/vnet-hub",
        )
        .unwrap();
        let settings = Settings::new("principal");
        let subs = BTreeMap::from([(sub.key.clone(), sub)]);
        let g = DependencyGraphBuilder::new(&settings)
            .build(&subs, Some(&hub))
            .unwrap();

        let plan = Planner::new().plan(g, "hash").unwrap();
        assert_eq!(
            rendered(&plan),
            vec![
                vec!["subscription/sub-a"],
                vec!["role_assignment/sub-a"],
                vec![
                    "management_group_association/sub-a",
                    "provider_registration/sub-a",
                ],
                vec!["virtual_network/sub-a"],
                vec![
                    "subnet/sub-a-subnet1",
                    "peering/sub-a-hub-to-spoke",
                    "peering/sub-a-spoke-to-hub",
                ],
            ]
        );

        let vnet = NodeId::new(ResourceKind::VirtualNetwork, "sub-a");
        let subnet = NodeId::new(ResourceKind::Subnet, "sub-a-subnet1");
        assert!(plan.batch_of(&subnet) > plan.batch_of(&vnet));
        assert_eq!(plan.kind_counts().get(&ResourceKind::ResourceGroup), None);

        let target = |key: &str| {
            plan.node(&NodeId::new(ResourceKind::Peering, key))
                .map(|n| n.target)
        };
        assert_eq!(target("sub-a-spoke-to-hub"), Some(AccountContext::Spoke));
        assert_eq!(target("sub-a-hub-to-spoke"), Some(AccountContext::Connectivity));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let build = || {
            Planner::new()
                .plan(
                    graph(vec![subnet("b", &[]), subnet("a", &[]), subnet("c", &["a"])]),
                    "hash",
                )
                .unwrap()
        };
        assert_eq!(rendered(&build()), rendered(&build()));
    }
}
