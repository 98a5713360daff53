//! Configuration specification types for landing zone subscriptions.
//!
//! The root file (`landing-zone.yaml`) carries [`Settings`] and optionally
//! inline subscriptions; each tenant may also live in its own YAML file under
//! the subscriptions directory. Every type here maps one-to-one to YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location applied when neither the resource nor its subscription sets one.
pub const DEFAULT_LOCATION: &str = "japaneast";

/// Built-in `Owner` role definition id.
pub const OWNER_ROLE_DEFINITION_ID: &str = "8e3af657-a8ff-443c-a75c-2fe8c4bcb635";

/// The root configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LandingZoneConfig {
    /// Global settings.
    pub settings: Settings,
    /// Directory holding one YAML file per tenant, relative to the root file.
    #[serde(default = "default_subscriptions_dir")]
    pub subscriptions_dir: String,
    /// Subscriptions declared inline in the root file.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSpec>,
}

/// Global settings shared by every subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Location used when nothing more specific is set.
    #[serde(default = "default_location")]
    pub default_location: String,
    /// Hub network coordinates.
    #[serde(default)]
    pub hub: HubConfig,
    /// Role assigned on every new subscription.
    pub role_assignment: RoleAssignmentConfig,
    /// Billing inputs used to build the subscription billing scope.
    #[serde(default)]
    pub billing: Option<BillingConfig>,
    /// Resource provider namespaces registered on every subscription.
    /// `Microsoft.Network` is always registered whether listed or not.
    #[serde(default = "default_resource_providers")]
    pub resource_providers: Vec<String>,
    /// Applier tuning.
    #[serde(default)]
    pub apply: ApplyConfig,
    /// Ledger location.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Hub network coordinates.
///
/// `topology_file` points at the connectivity deployment's exported topology;
/// the explicit fields are only used when that lookup comes back empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubConfig {
    /// Path to the exported hub topology JSON.
    #[serde(default)]
    pub topology_file: Option<String>,
    /// Explicit hub virtual network resource id.
    #[serde(default)]
    pub vnet_id: Option<String>,
    /// Explicit hub virtual network name.
    #[serde(default)]
    pub vnet_name: Option<String>,
    /// Explicit hub resource group name.
    #[serde(default)]
    pub resource_group_name: Option<String>,
}

/// Role assignment applied to each subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleAssignmentConfig {
    /// Object id of the principal receiving the role.
    pub principal_id: String,
    /// Role definition GUID.
    #[serde(default = "default_role_definition_id")]
    pub role_definition_id: String,
}

/// Microsoft Customer Agreement billing inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingConfig {
    /// Billing account name.
    #[serde(default)]
    pub billing_account_name: Option<String>,
    /// Billing profile name.
    #[serde(default)]
    pub billing_profile_name: Option<String>,
    /// Invoice section name.
    #[serde(default)]
    pub invoice_section_name: Option<String>,
}

/// Applier tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Maximum number of nodes applied concurrently within a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum attempts per node for transient errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Ledger location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory holding `ledger.json`; defaults to `.landing-zone` next to the root file.
    #[serde(default)]
    pub dir: Option<String>,
}

/// Subscription workload type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum Workload {
    /// Production workload.
    #[default]
    Production,
    /// Dev/test workload.
    DevTest,
}

/// One tenant's subscription definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Unique alias. Filled from the file name when omitted in a tenant file.
    #[serde(default)]
    pub key: String,
    /// Subscription display name.
    pub display_name: String,
    /// Workload type.
    #[serde(default)]
    pub workload: Workload,
    /// Management group the subscription is placed under.
    pub management_group_id: String,
    /// Tags applied to the subscription and inherited by its resources.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Resource groups keyed by a tenant-local key.
    #[serde(default)]
    pub resource_groups: Option<BTreeMap<String, ResourceGroupSpec>>,
    /// Optional spoke virtual network.
    #[serde(default)]
    pub virtual_network: Option<VirtualNetworkSpec>,
    /// Default location for this subscription's resources.
    #[serde(default)]
    pub location: Option<String>,
    /// Resolved billing scope; filled by the loader from the billing inputs.
    #[serde(default)]
    pub billing_scope: Option<String>,
    /// Per-subscription billing inputs, overriding the global ones.
    #[serde(default)]
    pub billing: Option<BillingConfig>,
}

/// A resource group inside a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceGroupSpec {
    /// Resource group name.
    pub name: String,
    /// Location override.
    #[serde(default)]
    pub location: Option<String>,
    /// Accepted for compatibility but not applied; resource groups always carry
    /// the subscription's tags.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

/// A spoke virtual network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualNetworkSpec {
    /// Virtual network name.
    pub name: String,
    /// Resource group holding the network.
    #[serde(default)]
    pub resource_group_name: Option<String>,
    /// Address space CIDRs, in order.
    #[serde(default)]
    pub address_space: Vec<String>,
    /// Subnets, in order.
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
    /// Peer this network with the hub.
    #[serde(default)]
    pub hub_peering_enabled: bool,
    /// Route through the hub's gateway.
    #[serde(default)]
    pub use_hub_gateway: bool,
    /// Location override.
    #[serde(default)]
    pub location: Option<String>,
}

/// A subnet inside a virtual network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetSpec {
    /// Subnet name.
    pub name: String,
    /// Address prefix CIDR.
    pub address_prefix: String,
}

// Default value functions

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_location() -> String {
    String::from(DEFAULT_LOCATION)
}

fn default_subscriptions_dir() -> String {
    String::from("subscriptions")
}

fn default_role_definition_id() -> String {
    String::from(OWNER_ROLE_DEFINITION_ID)
}

/// Provider every subscription registers before its network is created.
pub const NETWORK_PROVIDER: &str = "Microsoft.Network";

fn default_resource_providers() -> Vec<String> {
    vec![String::from(NETWORK_PROVIDER)]
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Settings {
    /// Creates settings with defaults and the given role principal.
    #[must_use]
    pub fn new(principal_id: impl Into<String>) -> Self {
        Self {
            default_location: default_location(),
            hub: HubConfig::default(),
            role_assignment: RoleAssignmentConfig {
                principal_id: principal_id.into(),
                role_definition_id: default_role_definition_id(),
            },
            billing: None,
            resource_providers: default_resource_providers(),
            apply: ApplyConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }

    /// Namespaces to register: `Microsoft.Network` first, then the configured
    /// ones without case-insensitive duplicates.
    #[must_use]
    pub fn provider_namespaces(&self) -> Vec<String> {
        let mut namespaces = vec![String::from(NETWORK_PROVIDER)];
        for namespace in &self.resource_providers {
            let namespace = namespace.trim();
            if !namespace.is_empty()
                && !namespaces.iter().any(|n| n.eq_ignore_ascii_case(namespace))
            {
                namespaces.push(namespace.to_string());
            }
        }
        namespaces
    }
}

impl BillingConfig {
    /// Builds the billing scope when all three inputs are present.
    ///
    /// Returns `Ok(None)` when none are set and `Err(field)` naming the first
    /// missing input when only some are.
    pub fn scope(&self) -> Result<Option<String>, &'static str> {
        match (
            self.billing_account_name.as_deref(),
            self.billing_profile_name.as_deref(),
            self.invoice_section_name.as_deref(),
        ) {
            (Some(account), Some(profile), Some(section)) => Ok(Some(format!(
                "/providers/Microsoft.Billing/billingAccounts/{account}/billingProfiles/{profile}/invoiceSections/{section}"
            ))),
            (None, None, None) => Ok(None),
            (None, _, _) => Err("billing_account_name"),
            (_, None, _) => Err("billing_profile_name"),
            (_, _, None) => Err("invoice_section_name"),
        }
    }
}

impl SubscriptionSpec {
    /// Creates a subscription with only the required fields set.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        management_group_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            workload: Workload::default(),
            management_group_id: management_group_id.into(),
            tags: BTreeMap::new(),
            resource_groups: None,
            virtual_network: None,
            location: None,
            billing_scope: None,
            billing: None,
        }
    }
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Production => "Production",
            Self::DevTest => "DevTest",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_scope_complete() {
        let billing = BillingConfig {
            billing_account_name: Some(String::from("acct")),
            billing_profile_name: Some(String::from("prof")),
            invoice_section_name: Some(String::from("sect")),
        };
        assert_eq!(
            billing.scope(),
            Ok(Some(String::from(
                "/providers/Microsoft.Billing/billingAccounts/acct/billingProfiles/prof/invoiceSections/sect"
            )))
        );
    }

    #[test]
    fn test_billing_scope_absent() {
        assert_eq!(BillingConfig::default().scope(), Ok(None));
    }

    #[test]
    fn test_billing_scope_partial() {
        let billing = BillingConfig {
            billing_account_name: Some(String::from("acct")),
            billing_profile_name: None,
            invoice_section_name: Some(String::from("sect")),
        };
        assert_eq!(billing.scope(), Err("billing_profile_name"));
    }

    #[test]
    fn test_workload_yaml_names() {
        let workload: Workload = serde_yaml::from_str("DevTest").unwrap();
        assert_eq!(workload, Workload::DevTest);
        assert_eq!(Workload::default(), Workload::Production);
    }
}
