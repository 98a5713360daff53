//! Configuration module for the landing zone provisioner.
//!
//! This module handles all configuration-related functionality:
//! - Loading the root file and per-tenant subscription files
//! - Validation of names, CIDRs and applier tuning
//! - Computing configuration hashes recorded in the ledger

mod spec;
mod parser;
mod validator;
mod hash;
mod cidr;

pub use spec::{
    ApplyConfig, BillingConfig, DEFAULT_LOCATION, HubConfig, LandingZoneConfig, LedgerConfig,
    NETWORK_PROVIDER, OWNER_ROLE_DEFINITION_ID, ResourceGroupSpec, RoleAssignmentConfig, Settings,
    SubnetSpec, SubscriptionSpec, VirtualNetworkSpec, Workload,
};
pub use parser::{ConfigParser, LoadedConfig, find_config_file};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConfigHasher;
pub use cidr::Cidr;
