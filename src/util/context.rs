//! Global context for zigext operations.
//!
//! Provides centralized access to configuration, paths, and environment.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::core::descriptor::{find_descriptor, DESCRIPTOR_FILE};
use crate::util::config::{global_config_path, load_config, project_config_path, Config};
use crate::util::diagnostic::suggestions;

/// Project directories for zigext
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("com", "zigext", "zigext"));

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Default artifact cache location
    cache_home: PathBuf,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext with defaults.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let cache_home = match PROJECT_DIRS.as_ref() {
            Some(dirs) => dirs.cache_dir().to_path_buf(),
            None => directories::BaseDirs::new()
                .map(|b| b.home_dir().join(".zigext").join("cache"))
                .unwrap_or_else(|| PathBuf::from(".zigext-cache")),
        };

        Ok(GlobalContext {
            cwd,
            cache_home,
            verbose: false,
            color: true,
        })
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Artifact cache directory: configured, else the platform cache dir.
    pub fn cache_dir(&self, config: &Config) -> PathBuf {
        config
            .cache
            .dir
            .clone()
            .unwrap_or_else(|| self.cache_home.join("artifacts"))
    }

    /// Locate the package descriptor.
    ///
    /// An explicit path wins (a directory means its `Zigext.toml`);
    /// otherwise search upward from the working directory.
    pub fn find_descriptor(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            let path = self.cwd.join(path);
            let path = if path.is_dir() {
                path.join(DESCRIPTOR_FILE)
            } else {
                path
            };
            if !path.is_file() {
                anyhow::bail!("package descriptor not found: {}", path.display());
            }
            return Ok(path);
        }

        find_descriptor(&self.cwd).with_context(|| {
            format!(
                "could not find {} in {} or any parent directory\n{}",
                DESCRIPTOR_FILE,
                self.cwd.display(),
                suggestions::NO_DESCRIPTOR
            )
        })
    }

    /// Merged configuration for a package: global file, project file, then
    /// environment overrides.
    pub fn load_config(&self, package_root: &Path) -> Config {
        let global = global_config_path();
        let mut config = load_config(global.as_deref(), &project_config_path(package_root));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }
}
