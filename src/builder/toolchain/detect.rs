//! Toolchain detection.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use semver::{Version, VersionReq};

use crate::error::ToolchainError;
use crate::util::config::Config;
use crate::util::process::{find_executable, ProcessBuilder};

use super::{fallback_triple, parse_env_target, ToolchainHandle, ZIG_EXE};

/// Where the locator looks, in priority order.
#[derive(Debug, Clone, Default)]
pub struct LocatorInputs {
    /// Explicit path from configuration or `ZIGEXT_ZIG`
    pub explicit: Option<PathBuf>,
    /// Value of the `ZIG` environment variable
    pub zig_env: Option<PathBuf>,
    /// Whether to consult PATH
    pub search_path: bool,
    /// Directories from `[toolchain] search-paths`
    pub extra_dirs: Vec<PathBuf>,
    /// Standard install locations
    pub standard_dirs: Vec<PathBuf>,
}

impl LocatorInputs {
    /// Inputs for a normal run: configuration, environment, PATH, and the
    /// standard install locations.
    ///
    /// A configured `zig` (config file, `ZIGEXT_ZIG` or `--zig`) is the only
    /// candidate; an unusable explicit toolchain is reported, never replaced.
    pub fn from_config(config: &Config) -> Self {
        if let Some(ref zig) = config.toolchain.zig {
            return LocatorInputs::explicit(zig.clone());
        }
        LocatorInputs {
            explicit: None,
            zig_env: std::env::var_os("ZIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            search_path: true,
            extra_dirs: config.toolchain.search_paths.clone(),
            standard_dirs: standard_dirs(),
        }
    }

    /// Only the given path is considered.
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        LocatorInputs {
            explicit: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Standard zig install locations for this platform.
fn standard_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(base) = directories::BaseDirs::new() {
        let home = base.home_dir();
        dirs.push(home.join(".local").join("bin"));
        dirs.push(home.join(".zig"));
        dirs.push(home.join("zig"));

        #[cfg(windows)]
        dirs.push(base.data_local_dir().join("zig"));
    }

    #[cfg(unix)]
    dirs.extend(
        [
            "/usr/local/bin",
            "/usr/bin",
            "/opt/zig",
            "/snap/bin",
            "/opt/homebrew/bin",
        ]
        .iter()
        .map(PathBuf::from),
    );

    dirs
}

/// Finds and validates a zig installation, once.
///
/// The result (success or failure) is memoised in the locator itself; build
/// contexts hold the locator rather than consulting any process-wide state.
#[derive(Debug)]
pub struct ToolchainLocator {
    inputs: LocatorInputs,
    requirement: String,
    cross_target: Option<String>,
    located: OnceLock<Result<ToolchainHandle, ToolchainError>>,
}

impl ToolchainLocator {
    pub fn new(inputs: LocatorInputs, requirement: impl Into<String>) -> Self {
        ToolchainLocator {
            inputs,
            requirement: requirement.into(),
            cross_target: None,
            located: OnceLock::new(),
        }
    }

    /// Locator configured from merged config and the environment.
    pub fn from_config(config: &Config) -> Self {
        ToolchainLocator::new(LocatorInputs::from_config(config), config.zig_version_req())
            .with_cross_target(config.toolchain.target.clone())
    }

    pub fn with_cross_target(mut self, target: Option<String>) -> Self {
        self.cross_target = target;
        self
    }

    pub fn requirement(&self) -> &str {
        &self.requirement
    }

    /// Candidate executables in priority order, without duplicates.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let inputs = &self.inputs;
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |p: PathBuf| {
            if !out.contains(&p) {
                out.push(p);
            }
        };

        if let Some(ref p) = inputs.explicit {
            push(p.clone());
        }
        if let Some(ref p) = inputs.zig_env {
            push(p.clone());
        }
        if inputs.search_path {
            if let Some(p) = find_executable("zig") {
                push(p);
            }
        }
        for dir in inputs.extra_dirs.iter().chain(&inputs.standard_dirs) {
            push(dir.join(ZIG_EXE));
        }

        out
    }

    /// Locate the toolchain. Probes at most once per locator.
    pub fn locate(&self) -> Result<ToolchainHandle, ToolchainError> {
        self.located.get_or_init(|| self.probe_candidates()).clone()
    }

    fn probe_candidates(&self) -> Result<ToolchainHandle, ToolchainError> {
        let req = parse_requirement(&self.requirement)?;
        let candidates = self.candidates();

        let mut mismatch = None;
        let mut probe_error = None;

        for candidate in &candidates {
            if !candidate.is_file() {
                tracing::trace!("no zig at {}", candidate.display());
                continue;
            }

            match probe(candidate) {
                Ok(handle) => {
                    if version_satisfies(&req, handle.version()) {
                        tracing::debug!(
                            "using zig {} at {}",
                            handle.version_string(),
                            candidate.display()
                        );
                        return Ok(handle.with_cross_target(self.cross_target.clone()));
                    }
                    tracing::debug!(
                        "zig {} at {} does not satisfy `{}`",
                        handle.version_string(),
                        candidate.display(),
                        self.requirement
                    );
                    mismatch.get_or_insert(ToolchainError::VersionMismatch {
                        path: candidate.clone(),
                        found: handle.version_string().to_string(),
                        required: self.requirement.clone(),
                    });
                }
                Err(e) => {
                    tracing::debug!("{}", e);
                    probe_error.get_or_insert(e);
                }
            }
        }

        Err(mismatch
            .or(probe_error)
            .unwrap_or(ToolchainError::NotFound {
                searched: candidates,
            }))
    }
}

fn parse_requirement(requirement: &str) -> Result<VersionReq, ToolchainError> {
    VersionReq::parse(requirement).map_err(|e| ToolchainError::InvalidRequirement {
        required: requirement.to_string(),
        detail: e.to_string(),
    })
}

/// Development builds (`0.14.0-dev.N+hash`) are matched as their release.
fn version_satisfies(req: &VersionReq, version: &Version) -> bool {
    let mut release = version.clone();
    release.pre = semver::Prerelease::EMPTY;
    release.build = semver::BuildMetadata::EMPTY;
    req.matches(&release)
}

/// Query one executable for its version and native target.
pub(crate) fn probe(path: &Path) -> Result<ToolchainHandle, ToolchainError> {
    let probe_err = |detail: String| ToolchainError::Probe {
        path: path.to_path_buf(),
        detail,
    };

    let output = ProcessBuilder::new(path)
        .arg("version")
        .exec()
        .map_err(|e| probe_err(e.to_string()))?;
    if !output.status.success() {
        return Err(probe_err(format!(
            "`zig version` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let triple = match ProcessBuilder::new(path).arg("env").exec() {
        Ok(out) if out.status.success() => {
            parse_env_target(&String::from_utf8_lossy(&out.stdout))
        }
        _ => None,
    }
    .unwrap_or_else(fallback_triple);

    ToolchainHandle::new(path.to_path_buf(), version, triple).map_err(probe_err)
}
