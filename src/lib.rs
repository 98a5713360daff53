// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![warn(warnings)]                    // All warnings are surfaced
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Landing Zone
//!
//! Dependency-aware, idempotent provisioning of Azure landing zone
//! subscriptions.
//!
//! ## Overview
//!
//! A landing zone is declared in YAML: global settings plus one entry per
//! tenant subscription with its resource groups, virtual network, subnets
//! and hub peering. The tool turns that declaration into cloud resources:
//!
//! - Subscriptions are created (or adopted by alias) and wired to their
//!   management group, owner role and resource providers
//! - Resource groups, virtual networks and subnets are ensured inside them
//! - Spoke networks are peered to the connectivity hub from both sides
//! - Every run is recorded in a ledger so failed nodes can be retried
//!
//! ## Architecture
//!
//! 1. **Configuration**: loaded from `landing-zone.yaml` and `subscriptions/*.yaml`
//! 2. **Graph**: flattened into keyed resource nodes with dependency edges
//! 3. **Plan**: layered into batches that respect every edge
//! 4. **Apply**: batches run in order with bounded concurrency and retry
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`graph`]: Key flattening, hub resolution and dependency graph
//! - [`planner`]: Batch planning, resume report and the applier
//! - [`cloud`]: Cloud client trait, Resource Manager client, in-memory cloud
//! - [`state`]: Run ledger persistence and locking
//! - [`provisioner`]: The end-to-end pipeline
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! settings:
//!   default_location: japaneast
//!   hub:
//!     vnet_id: /subscriptions/0000/resourceGroups/rg-hub/providers/Microsoft.Network/virtualNetworks/vnet-hub
//!   role_assignment:
//!     principal_id: 11111111-2222-3333-4444-555555555555
//!
//! subscriptions:
//!   - key: sub-a
//!     display_name: Tenant A
//!     management_group_id: mg-landing-zones
//!     virtual_network:
//!       name: vnet-a
//!       resource_group_name: rg-network
//!       address_space: ["10.1.0.0/16"]
//!       subnets:
//!         - name: app
//!           address_prefix: 10.1.0.0/24
//!       hub_peering_enabled: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provisioner;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{ArmClient, CloudClient, InMemoryCloud};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, LoadedConfig};
pub use error::{LandingZoneError, Result};
pub use graph::{DependencyGraphBuilder, KeyFlattener, ResourceGraph};
pub use planner::{Applier, ExecutionPlan, Planner, ResumeReport};
pub use provisioner::{CompiledPlan, Provisioner};
pub use state::{LedgerStore, LocalLedgerStore, RunLedger};
