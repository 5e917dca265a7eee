//! Command implementations

pub mod build;
pub mod cache;
pub mod completions;
pub mod plan;
pub mod toolchain;

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::PackageArgs;
use zigext::core::PackageDescriptor;
use zigext::error::BridgeError;
use zigext::util::config::Config;
use zigext::util::GlobalContext;

/// A located package with its merged configuration.
pub struct Package {
    pub root: PathBuf,
    pub descriptor: PackageDescriptor,
    pub config: Config,
}

/// Find and load the package, then layer CLI overrides over its config.
pub fn load_package(gctx: &GlobalContext, args: &PackageArgs) -> Result<Package> {
    let descriptor_path = gctx.find_descriptor(args.manifest_path.as_deref())?;
    let root = descriptor_path
        .parent()
        .map(PathBuf::from)
        .context("package descriptor has no parent directory")?;
    let descriptor = PackageDescriptor::load(&descriptor_path).map_err(BridgeError::from)?;

    let mut config = gctx.load_config(&root);
    apply_overrides(&mut config, args);

    Ok(Package {
        root,
        descriptor,
        config,
    })
}

/// Configuration for commands that may run outside a package.
pub fn load_config_near_cwd(gctx: &GlobalContext) -> Config {
    let root = gctx
        .find_descriptor(None)
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .unwrap_or_else(|| gctx.cwd().to_path_buf());
    gctx.load_config(&root)
}

/// CLI flags win over config files and the environment.
pub fn apply_overrides(config: &mut Config, args: &PackageArgs) {
    if let Some(ref zig) = args.zig {
        config.toolchain.zig = Some(zig.clone());
    }
    if let Some(ref python) = args.python {
        config.host.python = Some(python.clone());
    }
    if let Some(ref target) = args.target {
        config.toolchain.target = Some(target.clone());
    }
}
