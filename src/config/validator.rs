//! Configuration validation for landing zone definitions.
//!
//! Field-level checks run before flattening: names, CIDRs, subnet placement
//! and applier tuning. Structural problems (duplicate derived keys, missing
//! resource group references) are reported by the flattener instead.

use crate::error::{ConfigError, LandingZoneError, Result};
use crate::graph::HubNetwork;
use std::collections::HashSet;
use tracing::debug;

use super::cidr::Cidr;
use super::parser::LoadedConfig;
use super::spec::{Settings, SubscriptionSpec, VirtualNetworkSpec};

/// Validator for landing zone configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &LoadedConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(LandingZoneError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Runs every check and collects all errors and warnings.
    #[must_use]
    pub fn check(&self, config: &LoadedConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_settings(&config.settings, &mut result);

        let mut peered_spaces: Vec<(String, Cidr)> = Vec::new();
        for (key, spec) in &config.subscriptions {
            let prefix = format!("subscriptions.{key}");
            Self::validate_subscription(spec, &prefix, &mut result);

            if let Some(vnet) = &spec.virtual_network {
                Self::validate_virtual_network(vnet, &prefix, &mut result);
                if vnet.hub_peering_enabled {
                    Self::check_peered_overlap(key, vnet, &mut peered_spaces, &mut result);
                }
            }
        }

        result
    }

    /// Validates global settings.
    fn validate_settings(settings: &Settings, result: &mut ValidationResult) {
        if settings.default_location.is_empty() {
            result.push_error("settings.default_location", "Default location cannot be empty");
        }

        if settings.role_assignment.principal_id.is_empty() {
            result.push_error(
                "settings.role_assignment.principal_id",
                "Role assignment principal id cannot be empty",
            );
        }

        if settings.apply.concurrency == 0 {
            result.push_error("settings.apply.concurrency", "Concurrency must be at least 1");
        }

        if settings.apply.max_attempts == 0 {
            result.push_error("settings.apply.max_attempts", "Max attempts must be at least 1");
        }

        if settings.apply.base_delay_ms > settings.apply.max_delay_ms {
            result.warnings.push(String::from(
                "settings.apply: base_delay_ms exceeds max_delay_ms; every retry waits max_delay_ms",
            ));
        }

        if let Some(vnet_id) = &settings.hub.vnet_id
            && HubNetwork::from_resource_id(vnet_id).is_none()
        {
            result.push_error(
                "settings.hub.vnet_id",
                format!("'{vnet_id}' is not a virtual network resource id"),
            );
        }
    }

    /// Validates one subscription's own fields.
    fn validate_subscription(spec: &SubscriptionSpec, prefix: &str, result: &mut ValidationResult) {
        if !is_valid_alias(&spec.key) {
            result.push_error(
                format!("{prefix}.key"),
                format!(
                    "Subscription key '{}' is invalid. Use letters, digits, '-', '_' or '.' (max 63).",
                    spec.key
                ),
            );
        }

        if spec.display_name.is_empty() {
            result.push_error(format!("{prefix}.display_name"), "Display name cannot be empty");
        }

        if spec.management_group_id.is_empty() {
            result.push_error(
                format!("{prefix}.management_group_id"),
                "Management group id cannot be empty",
            );
        }

        if spec.billing_scope.is_none() {
            result.warnings.push(format!(
                "{prefix}: no billing scope; only an existing alias can be adopted"
            ));
        }

        for (rg_key, rg) in spec.resource_groups.iter().flatten() {
            if rg.name.is_empty() {
                result.push_error(
                    format!("{prefix}.resource_groups.{rg_key}.name"),
                    "Resource group name cannot be empty",
                );
            }
            if rg.tags.is_some() {
                result.warnings.push(format!(
                    "{prefix}.resource_groups.{rg_key}.tags: ignored; resource groups carry subscription tags"
                ));
            }
        }
    }

    /// Validates a virtual network's address space and subnets.
    fn validate_virtual_network(
        vnet: &VirtualNetworkSpec,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let prefix = format!("{prefix}.virtual_network");

        if vnet.name.is_empty() {
            result.push_error(format!("{prefix}.name"), "Virtual network name cannot be empty");
        }

        if vnet.address_space.is_empty() {
            result.push_error(
                format!("{prefix}.address_space"),
                "Address space must contain at least one CIDR",
            );
        }

        let mut space = Vec::new();
        for (i, entry) in vnet.address_space.iter().enumerate() {
            match entry.parse::<Cidr>() {
                Ok(cidr) if cidr.has_host_bits() => result.push_error(
                    format!("{prefix}.address_space[{i}]"),
                    format!("'{entry}' has host bits set; use {}/{}", cidr.network(), cidr.prefix),
                ),
                Ok(cidr) => space.push(cidr),
                Err(message) => result.push_error(format!("{prefix}.address_space[{i}]"), message),
            }
        }

        let mut seen_prefixes: Vec<Cidr> = Vec::new();
        let mut seen_names = HashSet::new();
        for (i, subnet) in vnet.subnets.iter().enumerate() {
            let field = format!("{prefix}.subnets[{i}]");

            if subnet.name.is_empty() {
                result.push_error(format!("{field}.name"), "Subnet name cannot be empty");
            } else if !seen_names.insert(subnet.name.as_str()) {
                result.push_error(
                    format!("{field}.name"),
                    format!("Duplicate subnet name: {}", subnet.name),
                );
            }

            let cidr = match subnet.address_prefix.parse::<Cidr>() {
                Ok(cidr) => cidr,
                Err(message) => {
                    result.push_error(format!("{field}.address_prefix"), message);
                    continue;
                }
            };

            if cidr.has_host_bits() {
                result.push_error(
                    format!("{field}.address_prefix"),
                    format!("'{cidr}' has host bits set"),
                );
            }

            if !space.is_empty() && !space.iter().any(|s| s.contains(cidr)) {
                result.push_error(
                    format!("{field}.address_prefix"),
                    format!("Subnet {cidr} is outside the virtual network address space"),
                );
            }

            if let Some(other) = seen_prefixes.iter().find(|p| p.overlaps(cidr)) {
                result.push_error(
                    format!("{field}.address_prefix"),
                    format!("Subnet {cidr} overlaps {other}"),
                );
            }
            seen_prefixes.push(cidr);
        }
    }

    /// Peered spokes must not overlap each other.
    fn check_peered_overlap(
        key: &str,
        vnet: &VirtualNetworkSpec,
        peered: &mut Vec<(String, Cidr)>,
        result: &mut ValidationResult,
    ) {
        for cidr in vnet.address_space.iter().filter_map(|s| s.parse::<Cidr>().ok()) {
            if let Some((other_key, other)) = peered.iter().find(|(_, c)| c.overlaps(cidr)) {
                result.warnings.push(format!(
                    "subscriptions.{key}.virtual_network: {cidr} overlaps {other} of '{other_key}'; both peer with the hub"
                ));
            }
            peered.push((key.to_string(), cidr));
        }
    }
}

/// Subscription aliases: letters, digits, `-`, `_`, `.`; 1 to 63 characters.
fn is_valid_alias(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 63
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl ValidationResult {
    fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceGroupSpec, Settings, SubnetSpec};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn loaded(subscriptions: Vec<SubscriptionSpec>) -> LoadedConfig {
        LoadedConfig {
            settings: Settings::new("principal"),
            subscriptions: subscriptions.into_iter().map(|s| (s.key.clone(), s)).collect(),
            base_dir: PathBuf::from("."),
        }
    }

    fn vnet(space: &[&str], subnets: &[(&str, &str)]) -> VirtualNetworkSpec {
        VirtualNetworkSpec {
            name: String::from("vnet"),
            resource_group_name: Some(String::from("rg-net")),
            address_space: space.iter().map(ToString::to_string).collect(),
            subnets: subnets
                .iter()
                .map(|(name, prefix)| SubnetSpec {
                    name: (*name).to_string(),
                    address_prefix: (*prefix).to_string(),
                })
                .collect(),
            hub_peering_enabled: true,
            use_hub_gateway: false,
            location: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        sub.virtual_network = Some(vnet(&["10.0.0.0/16"], &[("app", "10.0.1.0/24")]));
        let result = ConfigValidator::new().validate(&loaded(vec![sub])).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_invalid_alias() {
        assert!(is_valid_alias("sub-a_1.prod"));
        assert!(!is_valid_alias(""));
        assert!(!is_valid_alias("sub a"));
        assert!(!is_valid_alias(&"x".repeat(64)));
    }

    #[test]
    fn test_bad_cidr_rejected() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        sub.virtual_network = Some(vnet(&["10.0.0.0/16"], &[("app", "10.0.1.0/40")]));
        let result = ConfigValidator::new().check(&loaded(vec![sub]));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].field,
            "subscriptions.sub-a.virtual_network.subnets[0].address_prefix"
        );
    }

    #[test]
    fn test_subnet_outside_address_space() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        sub.virtual_network = Some(vnet(&["10.0.0.0/16"], &[("app", "10.1.0.0/24")]));
        let result = ConfigValidator::new().check(&loaded(vec![sub]));
        assert!(result.errors[0].message.contains("outside"));
    }

    #[test]
    fn test_overlapping_subnets() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        sub.virtual_network = Some(vnet(
            &["10.0.0.0/16"],
            &[("a", "10.0.0.0/23"), ("b", "10.0.1.0/24")],
        ));
        let result = ConfigValidator::new().check(&loaded(vec![sub]));
        assert!(result.errors.iter().any(|e| e.message.contains("overlaps")));
    }

    #[test]
    fn test_peered_spokes_overlap_warns() {
        let mut a = SubscriptionSpec::new("sub-a", "A", "mg");
        a.virtual_network = Some(vnet(&["10.0.0.0/16"], &[]));
        let mut b = SubscriptionSpec::new("sub-b", "B", "mg");
        b.virtual_network = Some(vnet(&["10.0.0.0/24"], &[]));
        let result = ConfigValidator::new().check(&loaded(vec![a, b]));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("'sub-a'")));
    }

    #[test]
    fn test_resource_group_tags_warn() {
        let mut sub = SubscriptionSpec::new("sub-a", "A", "mg");
        let mut groups = BTreeMap::new();
        groups.insert(
            String::from("app"),
            ResourceGroupSpec {
                name: String::from("rg-app"),
                location: None,
                tags: Some(BTreeMap::from([(String::from("k"), String::from("v"))])),
            },
        );
        sub.resource_groups = Some(groups);
        let result = ConfigValidator::new().check(&loaded(vec![sub]));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("tags: ignored")));
    }

    #[test]
    fn test_empty_principal_rejected() {
        let mut config = loaded(vec![]);
        config.settings.role_assignment.principal_id.clear();
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_bad_hub_id_rejected() {
        let mut config = loaded(vec![]);
        config.settings.hub.vnet_id = Some(String::from("/subscriptions/x"));
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.errors[0].field, "settings.hub.vnet_id");
    }
}
