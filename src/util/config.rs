//! Configuration file support for zigext.
//!
//! Two configuration file locations are merged:
//! - Global: `~/.zigext/config.toml` - user-wide defaults
//! - Project: `.zigext/config.toml` - package-specific overrides
//!
//! Project config takes precedence over global config. Environment variables
//! (`ZIGEXT_ZIG`, `ZIGEXT_PYTHON`, `ZIGEXT_CACHE_DIR`, `ZIGEXT_JOBS`) take
//! precedence over both, and CLI flags over everything.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::target::OptimizeMode;

/// Default toolchain version requirement.
pub const DEFAULT_ZIG_VERSION_REQ: &str = ">=0.11.0";

/// zigext configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub toolchain: ToolchainSettings,
    pub host: HostSettings,
    pub build: BuildSettings,
    pub cache: CacheSettings,
}

/// `[toolchain]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolchainSettings {
    /// Explicit path to the `zig` executable
    pub zig: Option<PathBuf>,

    /// Semver requirement for the toolchain version (e.g. ">=0.12, <0.15")
    pub version: Option<String>,

    /// Extra directories searched after PATH
    pub search_paths: Vec<PathBuf>,

    /// Cross-compilation target triple passed as `-target`
    pub target: Option<String>,
}

/// `[host]` section: the Python interpreter the modules are built for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostSettings {
    /// Interpreter to probe
    pub python: Option<PathBuf>,

    /// Override for the extension filename suffix (e.g. ".abi3.so")
    pub ext_suffix: Option<String>,

    /// Override for the C include directory containing Python.h
    pub include_dir: Option<PathBuf>,

    /// Host version to assume when no interpreter is available
    pub version: Option<semver::Version>,
}

/// `[build]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BuildSettings {
    /// Parallel compile jobs (None = available CPUs)
    pub jobs: Option<usize>,

    /// Optimization mode applied to every target, overriding the descriptor
    pub optimize: Option<OptimizeMode>,

    /// Output directory for placed modules, relative to the package root
    pub out_dir: Option<PathBuf>,
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheSettings {
    /// Artifact cache directory
    pub dir: Option<PathBuf>,

    /// Prune target for total cache size, in bytes
    pub max_size: Option<u64>,

    /// Entries unused for longer than this are pruned
    pub max_age_days: Option<u64>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration, falling back to defaults when the file is missing
    /// or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        let tc = other.toolchain;
        if tc.zig.is_some() {
            self.toolchain.zig = tc.zig;
        }
        if tc.version.is_some() {
            self.toolchain.version = tc.version;
        }
        if !tc.search_paths.is_empty() {
            self.toolchain.search_paths = tc.search_paths;
        }
        if tc.target.is_some() {
            self.toolchain.target = tc.target;
        }

        let host = other.host;
        if host.python.is_some() {
            self.host.python = host.python;
        }
        if host.ext_suffix.is_some() {
            self.host.ext_suffix = host.ext_suffix;
        }
        if host.include_dir.is_some() {
            self.host.include_dir = host.include_dir;
        }
        if host.version.is_some() {
            self.host.version = host.version;
        }

        let build = other.build;
        if build.jobs.is_some() {
            self.build.jobs = build.jobs;
        }
        if build.optimize.is_some() {
            self.build.optimize = build.optimize;
        }
        if build.out_dir.is_some() {
            self.build.out_dir = build.out_dir;
        }

        let cache = other.cache;
        if cache.dir.is_some() {
            self.cache.dir = cache.dir;
        }
        if cache.max_size.is_some() {
            self.cache.max_size = cache.max_size;
        }
        if cache.max_age_days.is_some() {
            self.cache.max_age_days = cache.max_age_days;
        }
    }

    /// Apply environment variable overrides read through `lookup`.
    ///
    /// Taking the lookup as a parameter keeps tests independent of the
    /// process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(zig) = lookup("ZIGEXT_ZIG").filter(|s| !s.is_empty()) {
            self.toolchain.zig = Some(PathBuf::from(zig));
        }
        if let Some(python) = lookup("ZIGEXT_PYTHON").filter(|s| !s.is_empty()) {
            self.host.python = Some(PathBuf::from(python));
        }
        if let Some(dir) = lookup("ZIGEXT_CACHE_DIR").filter(|s| !s.is_empty()) {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(jobs) = lookup("ZIGEXT_JOBS") {
            match jobs.parse::<usize>() {
                Ok(n) if n > 0 => self.build.jobs = Some(n),
                _ => tracing::warn!("ignoring invalid ZIGEXT_JOBS value `{}`", jobs),
            }
        }
    }

    /// The configured toolchain requirement, or the default.
    pub fn zig_version_req(&self) -> &str {
        self.toolchain
            .version
            .as_deref()
            .unwrap_or(DEFAULT_ZIG_VERSION_REQ)
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.zigext/config.toml)
/// 2. Global config (~/.zigext/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global) = global_path {
        if global.exists() {
            config.merge(Config::load_or_default(global));
        }
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global zigext config directory (~/.zigext).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".zigext"))
}

/// Get the global config path (~/.zigext/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.zigext/config.toml).
pub fn project_config_path(package_root: &Path) -> PathBuf {
    package_root.join(".zigext").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(
            r#"
[toolchain]
zig = "/opt/zig/zig"
version = ">=0.12"
search-paths = ["/usr/local/zig"]

[host]
python = "python3.12"
ext-suffix = ".abi3.so"

[build]
jobs = 4
optimize = "ReleaseSafe"

[cache]
max-size = 1048576
max-age-days = 30
"#,
        )
        .unwrap();

        assert_eq!(config.toolchain.zig, Some(PathBuf::from("/opt/zig/zig")));
        assert_eq!(config.zig_version_req(), ">=0.12");
        assert_eq!(config.host.ext_suffix.as_deref(), Some(".abi3.so"));
        assert_eq!(config.build.jobs, Some(4));
        assert_eq!(config.build.optimize, Some(OptimizeMode::ReleaseSafe));
        assert_eq!(config.cache.max_age_days, Some(30));
    }

    #[test]
    fn test_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join("project.toml");

        std::fs::write(&global, "[build]\njobs = 2\n[toolchain]\nzig = \"/g/zig\"\n").unwrap();
        std::fs::write(&project, "[build]\njobs = 8\n").unwrap();

        let config = load_config(Some(&global), &project);
        assert_eq!(config.build.jobs, Some(8));
        assert_eq!(config.toolchain.zig, Some(PathBuf::from("/g/zig")));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ZIGEXT_ZIG", "/env/zig"),
            ("ZIGEXT_JOBS", "3"),
            ("ZIGEXT_CACHE_DIR", "/tmp/cache"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.toolchain.zig = Some(PathBuf::from("/file/zig"));
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.toolchain.zig, Some(PathBuf::from("/env/zig")));
        assert_eq!(config.build.jobs, Some(3));
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/cache")));
    }

    #[test]
    fn test_invalid_jobs_env_ignored() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "ZIGEXT_JOBS").then(|| "zero".to_string()));
        assert_eq!(config.build.jobs, None);
    }

    #[test]
    fn test_default_version_req() {
        assert_eq!(Config::default().zig_version_req(), DEFAULT_ZIG_VERSION_REQ);
    }
}
