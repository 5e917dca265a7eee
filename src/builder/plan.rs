//! Build plan generation.
//!
//! A BuildPlan is the toolchain-ready form of one [`BuildTarget`]: absolute
//! sources, the fully expanded flag list, the target triple, and the staging
//! path the compiler writes to. Plans are derived deterministically from
//! their inputs and never mutated afterwards.
//!
//! The compiler runs from the package root, so relative paths in
//! pass-through arguments mean the same thing they do in the descriptor.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::builder::host::HostRuntime;
use crate::builder::toolchain::ToolchainHandle;
use crate::core::target::{BuildTarget, OptimizeMode};
use crate::util::fs::absolutize;

/// Staging directory, relative to the package root.
pub const STAGING_DIR: &str = ".zigext/target";

/// A resolved, toolchain-ready description of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    module_name: String,
    sources: Vec<PathBuf>,
    flags: Vec<String>,
    optimize: OptimizeMode,
    target_triple: String,
    output: PathBuf,
    zig_cache_dir: PathBuf,
    package_root: PathBuf,
    include_dirs: Vec<PathBuf>,
}

impl BuildPlan {
    /// Plan the compilation of `target` for `host` in the package at
    /// `package_root`. Output is staged under [`STAGING_DIR`].
    pub fn new(
        target: &BuildTarget,
        toolchain: &ToolchainHandle,
        host: &HostRuntime,
        package_root: &Path,
    ) -> Self {
        let staging_root = package_root.join(STAGING_DIR);
        let triple = toolchain.target_triple().to_string();
        let windows = triple.contains("windows");

        let mut flags: Vec<String> = vec![
            "build-lib".into(),
            "-dynamic".into(),
            "-O".into(),
            target.optimize().as_str().into(),
            "-lc".into(),
        ];
        if !windows {
            flags.push("-fallow-shlib-undefined".into());
        }
        flags.push("-I".into());
        flags.push(host.include_dir.display().to_string());
        if windows {
            flags.push(format!("-L{}", host.prefix.join("libs").display()));
            flags.push(format!("-l{}", host.windows_lib_name()));
        }
        if let Some(cross) = toolchain.cross_target() {
            flags.push("-target".into());
            flags.push(cross.to_string());
        }
        flags.extend(target.extra_args().iter().cloned());

        let output = staging_root
            .join(target.optimize().as_str())
            .join(format!("{}{}", target.name(), host.ext_suffix));

        BuildPlan {
            module_name: target.name().to_string(),
            sources: target.sources().to_vec(),
            flags,
            optimize: target.optimize(),
            target_triple: triple,
            output,
            zig_cache_dir: staging_root.join("zig-cache"),
            package_root: package_root.to_path_buf(),
            include_dirs: include_dirs(target.extra_args(), package_root),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Absolute source paths, in declaration order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Toolchain arguments, excluding the output and source paths.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn optimize(&self) -> OptimizeMode {
        self.optimize
    }

    pub fn target_triple(&self) -> &str {
        &self.target_triple
    }

    /// Staging path the compiler's artifact ends up at.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Zig's own incremental cache for this package.
    pub fn zig_cache_dir(&self) -> &Path {
        &self.zig_cache_dir
    }

    /// Working directory for the compiler.
    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    /// Header search directories named in the pass-through arguments,
    /// absolute. The host's Python include directory is not among them.
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }
}

/// `-I<dir>` and `-I <dir>` values from `args`, resolved against `root`.
fn include_dirs(args: &[String], root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let dir = match arg.strip_prefix("-I") {
            Some("") => iter.next().map(String::as_str),
            Some(dir) => Some(dir),
            None => None,
        };
        if let Some(dir) = dir {
            dirs.push(absolutize(root, Path::new(dir)));
        }
    }
    dirs
}
