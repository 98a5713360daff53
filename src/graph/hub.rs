//! Hub network resolution.
//!
//! The hub is owned by a separate connectivity deployment. Its identity comes
//! from that deployment's exported topology when available, falling back to
//! the explicit identifiers in `settings.hub`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::HubConfig;
use crate::error::{ConfigError, LandingZoneError, Result};

/// Identity of the hub virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubNetwork {
    /// Full resource id.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Owning resource group.
    pub resource_group: String,
    /// Owning subscription id.
    pub subscription_id: String,
}

impl HubNetwork {
    /// Parses a virtual network resource id of the form
    /// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Network/virtualNetworks/{name}`.
    #[must_use]
    pub fn from_resource_id(id: &str) -> Option<Self> {
        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();
        let [subs, subscription_id, rgs, resource_group, providers, namespace, vnets, name] =
            segments.as_slice()
        else {
            return None;
        };
        let matches = subs.eq_ignore_ascii_case("subscriptions")
            && rgs.eq_ignore_ascii_case("resourceGroups")
            && providers.eq_ignore_ascii_case("providers")
            && namespace.eq_ignore_ascii_case("Microsoft.Network")
            && vnets.eq_ignore_ascii_case("virtualNetworks");
        if !matches || [subscription_id, resource_group, name].iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            name: (*name).to_string(),
            resource_group: (*resource_group).to_string(),
            subscription_id: (*subscription_id).to_string(),
        })
    }

    /// Returns true if this hub is the given network.
    #[must_use]
    pub fn is_network(&self, resource_group: &str, name: &str) -> bool {
        self.resource_group.eq_ignore_ascii_case(resource_group)
            && self.name.eq_ignore_ascii_case(name)
    }
}

/// Source of the discovered hub topology.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubTopologyLookup: Send + Sync {
    /// Returns the discovered hub, or `None` when nothing was published.
    async fn lookup(&self) -> Result<Option<HubNetwork>>;
}

/// Topology exported by the connectivity deployment.
#[derive(Debug, Deserialize)]
struct TopologyFile {
    hub_vnet_id: String,
    #[serde(default)]
    hub_vnet_name: Option<String>,
    #[serde(default)]
    hub_resource_group_name: Option<String>,
}

/// Reads the hub topology from a JSON file.
#[derive(Debug, Clone)]
pub struct FileHubLookup {
    path: PathBuf,
}

impl FileHubLookup {
    /// Creates a lookup reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HubTopologyLookup for FileHubLookup {
    async fn lookup(&self) -> Result<Option<HubNetwork>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("Hub topology file not found: {}", self.path.display());
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let topology: TopologyFile = serde_json::from_str(&content).map_err(|e| {
            LandingZoneError::Config(ConfigError::ParseError {
                message: format!("Invalid hub topology: {e}"),
                location: Some(self.path.display().to_string()),
            })
        })?;

        let mut hub = parse_hub_id(&topology.hub_vnet_id, "hub_vnet_id")?;
        if let Some(name) = topology.hub_vnet_name {
            hub.name = name;
        }
        if let Some(rg) = topology.hub_resource_group_name {
            hub.resource_group = rg;
        }
        Ok(Some(hub))
    }
}

/// Lookup that never discovers anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHubLookup;

#[async_trait]
impl HubTopologyLookup for NoHubLookup {
    async fn lookup(&self) -> Result<Option<HubNetwork>> {
        Ok(None)
    }
}

/// Resolves the hub: discovered topology first, explicit settings second.
///
/// # Errors
///
/// Returns an error if the lookup fails or the explicit id is malformed.
pub async fn resolve_hub(
    lookup: &dyn HubTopologyLookup,
    explicit: &HubConfig,
) -> Result<Option<HubNetwork>> {
    if let Some(hub) = lookup.lookup().await? {
        info!("Using discovered hub network: {}", hub.id);
        return Ok(Some(hub));
    }

    let Some(vnet_id) = explicit.vnet_id.as_deref() else {
        debug!("No hub network configured");
        return Ok(None);
    };

    let mut hub = parse_hub_id(vnet_id, "settings.hub.vnet_id")?;
    if let Some(name) = &explicit.vnet_name {
        hub.name.clone_from(name);
    }
    if let Some(rg) = &explicit.resource_group_name {
        hub.resource_group.clone_from(rg);
    }
    info!("Using configured hub network: {}", hub.id);
    Ok(Some(hub))
}

fn parse_hub_id(id: &str, field: &str) -> Result<HubNetwork> {
    HubNetwork::from_resource_id(id).ok_or_else(|| {
        LandingZoneError::Config(ConfigError::validation(
            format!("'{id}' is not a virtual network resource id"),
            field,
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HUB_ID: &str =
        "/subscriptions/0000-hub/resourceGroups/rg-hub/providers/Microsoft.Network/virtualNetworks/vnet-hub";

    #[test]
    fn test_parse_resource_id() {
        let hub = HubNetwork::from_resource_id(HUB_ID).unwrap();
        assert_eq!(hub.subscription_id, "0000-hub");
        assert_eq!(hub.resource_group, "rg-hub");
        assert_eq!(hub.name, "vnet-hub");
        assert!(hub.is_network("RG-HUB", "vnet-hub"));
    }

    #[test]
    fn test_parse_resource_id_rejects_other_types() {
        assert!(HubNetwork::from_resource_id("/subscriptions/x/resourceGroups/rg").is_none());
        assert!(
            HubNetwork::from_resource_id(
                "/subscriptions/x/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm"
            )
            .is_none()
        );
    }

    #[tokio::test]
    async fn test_discovered_hub_wins() {
        let mut lookup = MockHubTopologyLookup::new();
        lookup
            .expect_lookup()
            .times(1)
            .returning(|| Ok(HubNetwork::from_resource_id(HUB_ID)));

        let explicit = HubConfig {
            vnet_id: Some(String::from(
                "/subscriptions/other/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/v",
            )),
            ..HubConfig::default()
        };
        let hub = resolve_hub(&lookup, &explicit).await.unwrap().unwrap();
        assert_eq!(hub.name, "vnet-hub");
    }

    #[tokio::test]
    async fn test_explicit_fallback() {
        let mut lookup = MockHubTopologyLookup::new();
        lookup.expect_lookup().returning(|| Ok(None));

        let explicit = HubConfig {
            vnet_id: Some(String::from(HUB_ID)),
            vnet_name: Some(String::from("hub-display")),
            ..HubConfig::default()
        };
        let hub = resolve_hub(&lookup, &explicit).await.unwrap().unwrap();
        assert_eq!(hub.name, "hub-display");
        assert_eq!(hub.resource_group, "rg-hub");
    }

    #[tokio::test]
    async fn test_no_hub() {
        let hub = resolve_hub(&NoHubLookup, &HubConfig::default()).await.unwrap();
        assert!(hub.is_none());
    }

    #[tokio::test]
    async fn test_file_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        std::fs::write(
            &path,
            format!(r#"{{"hub_vnet_id": "{HUB_ID}", "hub_resource_group_name": "rg-hub-2"}}"#),
        )
        .unwrap();

        let hub = FileHubLookup::new(&path).lookup().await.unwrap().unwrap();
        assert_eq!(hub.resource_group, "rg-hub-2");

        let missing = FileHubLookup::new(dir.path().join("absent.json"));
        assert!(missing.lookup().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_lookup_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(FileHubLookup::new(&path).lookup().await.is_err());
    }
}
