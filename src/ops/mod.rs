//! High-level operations.
//!
//! This module contains the implementation of zigext commands.

pub mod zigext_build;
pub mod zigext_plan;

pub use zigext_build::{
    build, build_with_events, BuildOptions, BuildReport, MessageFormat, TargetOutcome,
    TargetReport,
};
pub use zigext_plan::{plan, PackagePlan, PlannedTarget};
