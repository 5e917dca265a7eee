//! Implementation of `zigext plan`: resolve and fingerprint without
//! compiling.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::builder::fingerprint::Fingerprint;
use crate::builder::host::HostRuntime;
use crate::builder::placement::Placer;
use crate::builder::plan::BuildPlan;
use crate::builder::resolver::resolve;
use crate::builder::toolchain::ToolchainHandle;
use crate::core::descriptor::PackageDescriptor;
use crate::core::target::OptimizeMode;
use crate::error::BridgeError;

/// One target as it would be built.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTarget {
    pub module: String,
    pub fingerprint: Fingerprint,
    pub plan: BuildPlan,
    /// Where placement would install the module
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackagePlan {
    pub package: String,
    pub version: String,
    pub toolchain: String,
    pub target_triple: String,
    pub targets: Vec<PlannedTarget>,
}

/// Plan every extension of `descriptor` for `toolchain` and `host`.
pub fn plan(
    descriptor: &PackageDescriptor,
    package_root: &Path,
    toolchain: &ToolchainHandle,
    host: &HostRuntime,
    optimize: Option<OptimizeMode>,
    dest_root: &Path,
) -> Result<PackagePlan, BridgeError> {
    let targets = resolve(descriptor, package_root, optimize)?;
    let placer = Placer::new(dest_root, host.ext_suffix.clone());

    let planned = targets
        .iter()
        .map(|target| {
            let plan = BuildPlan::new(target, toolchain, host, package_root);
            let fingerprint = Fingerprint::compute(&plan, toolchain)?;
            Ok(PlannedTarget {
                module: target.name().to_string(),
                fingerprint,
                destination: dest_root.join(placer.relative_path(target.name())),
                plan,
            })
        })
        .collect::<Result<Vec<_>, BridgeError>>()?;

    Ok(PackagePlan {
        package: descriptor.package.name.clone(),
        version: descriptor.package.version.clone(),
        toolchain: toolchain.identity(),
        target_triple: toolchain.target_triple().to_string(),
        targets: planned,
    })
}
