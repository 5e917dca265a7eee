//! `zigext plan` command

use anyhow::Result;

use super::load_package;
use crate::cli::PlanArgs;
use zigext::builder::{HostRuntime, ToolchainLocator};
use zigext::error::BridgeError;
use zigext::ops::zigext_build::BuildOptions;
use zigext::ops::zigext_plan::plan;
use zigext::util::GlobalContext;

pub fn execute(args: PlanArgs, gctx: &GlobalContext) -> Result<i32> {
    let pkg = load_package(gctx, &args.package)?;
    let config = &pkg.config;

    let toolchain = ToolchainLocator::from_config(config)
        .locate()
        .map_err(BridgeError::from)?;
    let host = HostRuntime::detect(&config.host).map_err(BridgeError::from)?;

    let opts = BuildOptions {
        out_dir: config.build.out_dir.clone(),
        ..BuildOptions::default()
    };
    let optimize = args.optimize.or(config.build.optimize);
    let planned = plan(
        &pkg.descriptor,
        &pkg.root,
        &toolchain,
        &host,
        optimize,
        &opts.dest_root(&pkg.root),
    )?;

    println!("{}", serde_json::to_string_pretty(&planned)?);
    Ok(0)
}
