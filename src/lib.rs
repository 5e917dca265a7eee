//! zigext - build Zig sources into Python extension modules
//!
//! This crate provides the library behind the `zigext` binary: descriptor
//! resolution, toolchain discovery, compilation, artifact caching and
//! placement of the built modules.

pub mod builder;
pub mod core;
pub mod error;
pub mod ops;
pub mod util;

/// Test utilities for zigext unit tests.
///
/// This module is only available when compiling with `--cfg test`. It
/// provides a fake `zig` script, a stub compiler and package fixtures.
#[cfg(test)]
pub mod test_support;

pub use builder::{
    ArtifactCache, BuildContext, BuildPlan, Fingerprint, HostRuntime, ToolchainHandle,
    ToolchainLocator,
};
pub use core::{BuildTarget, OptimizeMode, PackageDescriptor};
pub use error::BridgeError;
pub use util::cancel::CancelToken;
pub use util::context::GlobalContext;
