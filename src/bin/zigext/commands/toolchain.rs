//! `zigext toolchain` command

use anyhow::Result;
use serde::Serialize;

use super::{apply_overrides, load_config_near_cwd, load_package};
use crate::cli::ToolchainArgs;
use zigext::builder::{HostRuntime, ToolchainHandle, ToolchainLocator};
use zigext::error::BridgeError;
use zigext::util::GlobalContext;

#[derive(Serialize)]
struct ToolchainReport<'a> {
    zig: &'a ToolchainHandle,
    requirement: &'a str,
    host: Option<&'a HostRuntime>,
}

pub fn execute(args: ToolchainArgs, gctx: &GlobalContext) -> Result<i32> {
    let config = if args.package.manifest_path.is_some() {
        load_package(gctx, &args.package)?.config
    } else {
        let mut config = load_config_near_cwd(gctx);
        apply_overrides(&mut config, &args.package);
        config
    };

    let locator = ToolchainLocator::from_config(&config);
    let zig = match locator.locate() {
        Ok(zig) => zig,
        Err(e) => {
            if gctx.is_verbose() {
                for candidate in locator.candidates() {
                    eprintln!("  searched {}", candidate.display());
                }
            }
            return Err(BridgeError::from(e).into());
        }
    };

    let host = match HostRuntime::detect(&config.host) {
        Ok(host) => Some(host),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    };

    if args.json {
        let report = ToolchainReport {
            zig: &zig,
            requirement: locator.requirement(),
            host: host.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    println!("Toolchain:");
    println!();
    println!("  zig:      {}", zig.path().display());
    println!("  version:  {} (requires {})", zig.version_string(), locator.requirement());
    println!("  native:   {}", zig.native_triple());
    if let Some(cross) = zig.cross_target() {
        println!("  target:   {}", cross);
    }
    println!();

    println!("Host:");
    println!();
    match host {
        Some(host) => {
            match host.interpreter {
                Some(ref python) => println!("  python:   {}", python.display()),
                None => println!("  python:   (configured)"),
            }
            println!("  version:  {}", host.version);
            println!("  suffix:   {}", host.ext_suffix);
            println!("  include:  {}", host.include_dir.display());
        }
        None => println!("  python:   not found"),
    }

    Ok(0)
}
