//! Planning and applying.
//!
//! This module turns a resource graph into ordered batches, compares them with
//! the previous run and applies them through a cloud client.

mod plan;
mod retry;
mod resume;
mod executor;

pub use plan::{ExecutionPlan, Planner};
pub use retry::RetryPolicy;
pub use resume::{ResumeEntry, ResumeReport, ResumeState};
pub use executor::{Applier, DEFAULT_CONCURRENCY};
