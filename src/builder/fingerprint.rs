//! Build fingerprinting for incremental builds.
//!
//! A fingerprint captures every input that can change the compiled module:
//! the content of each source in plan order, every local file those sources
//! reach through imports and includes, the flag list, the toolchain
//! identity, and the target triple. The staging output path and the package
//! location are not part of it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builder::imports::collect_dependencies;
use crate::builder::plan::BuildPlan;
use crate::builder::toolchain::ToolchainHandle;
use crate::error::DescriptorError;
use crate::util::hash::DigestBuilder;

/// Bumped whenever the fingerprint layout changes.
const FINGERPRINT_VERSION: &str = "zigext-fp-2";

/// Hex SHA-256 identifying one set of build inputs. The cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a plan as built by `toolchain`.
    ///
    /// Reads every source; a source that disappeared since resolution is
    /// reported as missing.
    pub fn compute(plan: &BuildPlan, toolchain: &ToolchainHandle) -> Result<Self, DescriptorError> {
        let mut digest = DigestBuilder::new();
        digest.update_str(FINGERPRINT_VERSION);

        digest.section("sources");
        for source in plan.sources() {
            digest
                .update_file(source)
                .map_err(|_| DescriptorError::MissingSource {
                    module: plan.module_name().to_string(),
                    path: source.clone(),
                })?;
        }

        let dependencies = collect_dependencies(plan.sources(), plan.include_dirs());
        digest.section("dependencies");
        for dep in &dependencies {
            // Vanished since discovery; the compiler will report it.
            let Ok(contents) = std::fs::read(dep) else {
                continue;
            };
            let name = dep.strip_prefix(plan.package_root()).unwrap_or(dep);
            digest
                .update_str(&name.to_string_lossy())
                .update_bytes(&contents);
        }

        digest
            .section("flags")
            .update_strs(plan.flags().iter().map(String::as_str));
        digest.section("toolchain").update_str(&toolchain.identity());
        digest.section("triple").update_str(plan.target_triple());

        Ok(Fingerprint(digest.finish()))
    }

    /// Wrap an existing hex digest, e.g. one read back from the cache index.
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        let valid = hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Fingerprint(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
