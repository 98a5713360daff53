//! Flattening of per-subscription collections into globally keyed maps.
//!
//! Resource groups are keyed `{subscription}-{rgKey}`, subnets
//! `{subscription}-{subnetName}`, virtual networks and peering pairs by the
//! subscription key. A derived key produced twice is a conflict; nothing is
//! silently overwritten.

use std::collections::BTreeMap;
use tracing::warn;

use crate::config::{SubscriptionSpec, VirtualNetworkSpec};
use crate::error::{ConfigError, Result};

/// A resource group with its location and tags resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResourceGroup {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Resource group name.
    pub name: String,
    /// Resolved location.
    pub location: String,
    /// Tags inherited from the subscription.
    pub tags: BTreeMap<String, String>,
}

/// A spoke virtual network with its location and tags resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVirtualNetwork {
    /// Owning subscription key.
    pub subscription_key: String,
    /// Network name.
    pub name: String,
    /// Resource group holding the network.
    pub resource_group_name: String,
    /// Global key of the declared resource group of that name, if any.
    pub resource_group_key: Option<String>,
    /// Resolved location.
    pub location: String,
    /// Address space CIDRs.
    pub address_space: Vec<String>,
    /// Tags inherited from the subscription.
    pub tags: BTreeMap<String, String>,
}

/// A subnet with its parent network resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubnet {
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

/// A spoke that should be peered with the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeringPair {
    /// Spoke subscription key.
    pub subscription_key: String,
    /// Spoke network name.
    pub virtual_network_name: String,
    /// Spoke resource group.
    pub resource_group_name: String,
    /// Route through the hub's gateway.
    pub use_hub_gateway: bool,
}

/// Globally keyed resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedResources {
    /// Resource groups keyed `{subscription}-{rgKey}`.
    pub resource_groups: BTreeMap<String, ResolvedResourceGroup>,
    /// Virtual networks keyed by subscription.
    pub virtual_networks: BTreeMap<String, ResolvedVirtualNetwork>,
    /// Subnets keyed `{subscription}-{subnetName}`.
    pub subnets: BTreeMap<String, ResolvedSubnet>,
    /// Peering pairs keyed by subscription.
    pub peerings: BTreeMap<String, PeeringPair>,
}

/// Flattens subscriptions into [`FlattenedResources`].
#[derive(Debug, Clone)]
pub struct KeyFlattener {
    default_location: String,
}

/// Tracks which entry produced each key so conflicts can name both.
#[derive(Default)]
struct Sources(BTreeMap<String, String>);

impl Sources {
    fn claim(&mut self, kind: &str, key: &str, source: String) -> Result<()> {
        if let Some(first) = self.0.get(key) {
            return Err(ConfigError::ConfigConflict {
                kind: kind.to_string(),
                key: key.to_string(),
                first: first.clone(),
                second: source,
            }
            .into());
        }
        self.0.insert(key.to_string(), source);
        Ok(())
    }
}

impl KeyFlattener {
    /// Creates a flattener using `default_location` as the last fallback.
    #[must_use]
    pub fn new(default_location: impl Into<String>) -> Self {
        Self {
            default_location: default_location.into(),
        }
    }

    /// Flattens every subscription.
    ///
    /// # Errors
    ///
    /// Returns `ConfigConflict` when two entries derive the same key and
    /// `MissingField` when a network lacks its resource group name.
    pub fn flatten(
        &self,
        subscriptions: &BTreeMap<String, SubscriptionSpec>,
    ) -> Result<FlattenedResources> {
        let mut out = FlattenedResources::default();
        let mut rg_sources = Sources::default();
        let mut subnet_sources = Sources::default();
        let mut hub_side_names = Sources::default();

        for (sub_key, sub) in subscriptions {
            for (rg_key, rg) in sub.resource_groups.iter().flatten() {
                let key = format!("{sub_key}-{rg_key}");
                rg_sources.claim(
                    "resource_group",
                    &key,
                    format!("subscriptions.{sub_key}.resource_groups.{rg_key}"),
                )?;
                if rg.tags.as_ref().is_some_and(|t| !t.is_empty()) {
                    warn!(
                        "Tags on resource group '{}' in '{}' are ignored; subscription tags apply",
                        rg.name, sub_key
                    );
                }
                out.resource_groups.insert(
                    key,
                    ResolvedResourceGroup {
                        subscription_key: sub_key.clone(),
                        name: rg.name.clone(),
                        location: self.location(rg.location.as_ref(), sub),
                        tags: sub.tags.clone(),
                    },
                );
            }

            let Some(vnet) = &sub.virtual_network else {
                continue;
            };
            let resolved = self.resolve_vnet(sub_key, sub, vnet)?;

            for subnet in &vnet.subnets {
                let key = format!("{sub_key}-{}", subnet.name);
                subnet_sources.claim(
                    "subnet",
                    &key,
                    format!("subscriptions.{sub_key}.virtual_network.subnets.{}", subnet.name),
                )?;
                out.subnets.insert(
                    key,
                    ResolvedSubnet {
                        subscription_key: sub_key.clone(),
                        resource_group_name: resolved.resource_group_name.clone(),
                        virtual_network_name: resolved.name.clone(),
                        name: subnet.name.clone(),
                        address_prefix: subnet.address_prefix.clone(),
                    },
                );
            }

            if vnet.hub_peering_enabled {
                // Hub-side peering names are derived from the spoke network
                // name and share the hub's namespace.
                hub_side_names.claim(
                    "peering",
                    &resolved.name.to_ascii_lowercase(),
                    format!("subscriptions.{sub_key}.virtual_network"),
                )?;
                out.peerings.insert(
                    sub_key.clone(),
                    PeeringPair {
                        subscription_key: sub_key.clone(),
                        virtual_network_name: resolved.name.clone(),
                        resource_group_name: resolved.resource_group_name.clone(),
                        use_hub_gateway: vnet.use_hub_gateway,
                    },
                );
            }

            out.virtual_networks.insert(sub_key.clone(), resolved);
        }

        Ok(out)
    }

    fn resolve_vnet(
        &self,
        sub_key: &str,
        sub: &SubscriptionSpec,
        vnet: &VirtualNetworkSpec,
    ) -> Result<ResolvedVirtualNetwork> {
        let resource_group_name = vnet
            .resource_group_name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ConfigError::missing(
                    format!("subscriptions.{sub_key}.virtual_network"),
                    "resource_group_name",
                )
            })?;

        let resource_group_key = sub
            .resource_groups
            .iter()
            .flatten()
            .find(|(_, rg)| rg.name == resource_group_name)
            .map(|(rg_key, _)| format!("{sub_key}-{rg_key}"));

        Ok(ResolvedVirtualNetwork {
            subscription_key: sub_key.to_string(),
            name: vnet.name.clone(),
            resource_group_name,
            resource_group_key,
            location: self.location(vnet.location.as_ref(), sub),
            address_space: vnet.address_space.clone(),
            tags: sub.tags.clone(),
        })
    }

    fn location(&self, own: Option<&String>, sub: &SubscriptionSpec) -> String {
        own.or(sub.location.as_ref())
            .unwrap_or(&self.default_location)
            .clone()
    }
}
