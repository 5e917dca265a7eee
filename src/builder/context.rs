//! Build context - toolchain, host runtime, cache and compiler.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::builder::cache::ArtifactCache;
use crate::builder::host::HostRuntime;
use crate::builder::invoker::{Compiler, ZigCompiler};
use crate::builder::toolchain::{ToolchainHandle, ToolchainLocator};
use crate::error::BridgeError;
use crate::util::config::Config;

/// Everything a build needs that is shared across targets.
#[derive(Clone)]
pub struct BuildContext {
    /// Located zig toolchain
    pub toolchain: ToolchainHandle,

    /// Host interpreter description
    pub host: HostRuntime,

    /// Artifact cache shared by all targets
    pub cache: Arc<ArtifactCache>,

    /// Compilation backend
    pub compiler: Arc<dyn Compiler>,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("toolchain", &self.toolchain)
            .field("host", &self.host)
            .field("cache", &self.cache.root())
            .finish()
    }
}

impl BuildContext {
    /// Assemble a context from already-initialised parts.
    pub fn new(
        toolchain: ToolchainHandle,
        host: HostRuntime,
        cache: Arc<ArtifactCache>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        BuildContext {
            toolchain,
            host,
            cache,
            compiler,
        }
    }

    /// Locate the toolchain, probe the host and open the cache.
    pub fn init(config: &Config, cache_root: &Path) -> Result<Self, BridgeError> {
        let locator = ToolchainLocator::from_config(config);
        Self::with_locator(&locator, config, cache_root)
    }

    /// Like [`BuildContext::init`], reusing a locator's memoised result.
    pub fn with_locator(
        locator: &ToolchainLocator,
        config: &Config,
        cache_root: &Path,
    ) -> Result<Self, BridgeError> {
        let toolchain = locator.locate()?;
        tracing::debug!(
            "using zig {} at {} for {}",
            toolchain.version_string(),
            toolchain.path().display(),
            toolchain.target_triple()
        );

        let host = HostRuntime::detect(&config.host)?;
        tracing::debug!(
            "host python {} (extension suffix `{}`)",
            host.version,
            host.ext_suffix
        );

        let cache = ArtifactCache::open(cache_root)?;

        Ok(BuildContext::new(
            toolchain,
            host,
            Arc::new(cache),
            Arc::new(ZigCompiler::new()),
        ))
    }

    /// Package id used in events, e.g. `pyzigtest v0.1.0`.
    pub fn package_id(name: &str, version: &str) -> String {
        format!("{} v{}", name, version)
    }
}
