//! Zig toolchain discovery and command generation.
//!
//! Toolchain detection priority:
//! 1. Explicit configuration (`[toolchain] zig` or `ZIGEXT_ZIG`)
//! 2. The `ZIG` environment variable
//! 3. `zig` on PATH
//! 4. Configured search paths, then standard install locations

use std::path::{Path, PathBuf};

use semver::Version;
use serde::Serialize;

use crate::builder::plan::BuildPlan;
use crate::util::process::ProcessBuilder;

mod detect;
mod zig;

pub use detect::{LocatorInputs, ToolchainLocator};
pub use zig::{fallback_triple, parse_env_target, parse_version};

/// Executable name of the toolchain on this platform.
pub const ZIG_EXE: &str = if cfg!(windows) { "zig.exe" } else { "zig" };

/// A command to execute, with program, arguments, and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to run
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a new command spec.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Convert into an executable process builder.
    pub fn into_process(self) -> ProcessBuilder {
        let mut pb = ProcessBuilder::new(&self.program).args(&self.args);
        for (key, value) in &self.env {
            pb = pb.env(key, value);
        }
        if let Some(ref dir) = self.cwd {
            pb = pb.cwd(dir);
        }
        pb
    }
}

/// A located, version-checked zig installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainHandle {
    path: PathBuf,
    version: Version,
    version_string: String,
    native_triple: String,
    cross_target: Option<String>,
}

impl ToolchainHandle {
    pub fn new(
        path: PathBuf,
        version_string: impl Into<String>,
        native_triple: impl Into<String>,
    ) -> Result<Self, String> {
        let version_string = version_string.into();
        let version = parse_version(&version_string)?;
        Ok(ToolchainHandle {
            path,
            version,
            version_string,
            native_triple: native_triple.into(),
            cross_target: None,
        })
    }

    /// Target a triple other than the toolchain's native one.
    pub fn with_cross_target(mut self, target: Option<String>) -> Self {
        self.cross_target = target;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Version exactly as reported by `zig version`.
    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    /// Identity string mixed into fingerprints.
    pub fn identity(&self) -> String {
        format!("zig {}", self.version_string)
    }

    pub fn native_triple(&self) -> &str {
        &self.native_triple
    }

    /// Explicit `-target` value, when cross-compiling.
    pub fn cross_target(&self) -> Option<&str> {
        self.cross_target.as_deref()
    }

    /// The triple artifacts are produced for.
    pub fn target_triple(&self) -> &str {
        self.cross_target.as_deref().unwrap_or(&self.native_triple)
    }

    /// Generate the `zig build-lib` command for a plan, emitting to `emit`.
    pub fn build_lib_command(&self, plan: &BuildPlan, emit: &Path) -> CommandSpec {
        CommandSpec::new(&self.path)
            .args(plan.flags().iter().cloned())
            .arg(format!("-femit-bin={}", emit.display()))
            .args(plan.sources().iter().map(|s| s.display().to_string()))
            .env(
                "ZIG_LOCAL_CACHE_DIR",
                plan.zig_cache_dir().display().to_string(),
            )
            .cwd(plan.package_root())
    }
}
