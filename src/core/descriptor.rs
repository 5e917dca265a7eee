//! Package descriptor - the `Zigext.toml` input contract.
//!
//! The descriptor mirrors what a Python packaging tool hands the bridge:
//! package metadata plus a list of extension declarations.
//!
//! ```toml
//! [package]
//! name = "pyzigtest"
//! version = "0.1.0"
//! python-requires = ">=3.10"
//! build-zig = true
//!
//! [[extension]]
//! name = "pyzigtest"
//! sources = ["pyzigtest.zig"]
//! extra-compile-args = ["-DOptimize=Debug"]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// Canonical descriptor file name.
pub const DESCRIPTOR_FILE: &str = "Zigext.toml";

/// Raw package descriptor, as declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub package: PackageMeta,

    #[serde(default, rename = "extension")]
    pub extensions: Vec<ExtensionDecl>,
}

/// `[package]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageMeta {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub python_requires: Option<String>,

    /// Whether this package opts into the zig build
    #[serde(default)]
    pub build_zig: bool,
}

/// One `[[extension]]` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionDecl {
    pub name: String,

    #[serde(default)]
    pub sources: Vec<PathBuf>,

    #[serde(default)]
    pub extra_compile_args: Vec<String>,
}

impl PackageDescriptor {
    /// Load a descriptor from a `Zigext.toml` file.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let contents = std::fs::read_to_string(path).map_err(|e| DescriptorError::Read {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::parse(&contents, path)
    }

    /// Parse descriptor text; `path` is only used for error messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, DescriptorError> {
        toml::from_str(contents).map_err(|e| DescriptorError::Parse {
            path: path.to_path_buf(),
            detail: e.message().to_string(),
        })
    }

    /// Parsed package version.
    pub fn version(&self) -> Result<Version, DescriptorError> {
        Version::parse(&self.package.version).map_err(|e| DescriptorError::InvalidVersion {
            version: self.package.version.clone(),
            detail: e.to_string(),
        })
    }

    /// Parsed `python-requires`, if declared.
    pub fn python_requirement(&self) -> Result<Option<PythonRequirement>, DescriptorError> {
        self.package
            .python_requires
            .as_deref()
            .map(PythonRequirement::parse)
            .transpose()
    }
}

/// Find the descriptor starting from `start` and searching upward.
pub fn find_descriptor(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(DESCRIPTOR_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// A Python version specifier set (`>=3.10, !=3.11.*`) translated to semver.
///
/// Partial versions are zero-padded (`>3.10` means `>3.10.0`, as in Python
/// packaging), `==X.*` becomes a semver wildcard, and `~=` becomes its
/// equivalent range.
#[derive(Debug, Clone, PartialEq)]
pub struct PythonRequirement {
    spec: String,
    include: VersionReq,
    exclude: Vec<VersionReq>,
}

impl PythonRequirement {
    pub fn parse(spec: &str) -> Result<Self, DescriptorError> {
        let invalid = |detail: String| DescriptorError::InvalidPythonRequires {
            spec: spec.to_string(),
            detail,
        };

        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for clause in spec.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (op, version) = split_operator(clause)
                .ok_or_else(|| invalid(format!("unsupported clause `{}`", clause)))?;

            match op {
                "~=" => include.extend(compatible_release(version).map_err(&invalid)?),
                "==" => include.push(exact_or_wildcard(version)),
                "!=" => exclude.push(
                    VersionReq::parse(&exact_or_wildcard(version))
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                ">=" | "<=" | ">" | "<" => include.push(format!("{}{}", op, pad(version))),
                _ => return Err(invalid(format!("unsupported operator `{}`", op))),
            }
        }

        let include = if include.is_empty() {
            VersionReq::STAR
        } else {
            VersionReq::parse(&include.join(", ")).map_err(|e| invalid(e.to_string()))?
        };

        Ok(PythonRequirement {
            spec: spec.to_string(),
            include,
            exclude,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.include.matches(version) && !self.exclude.iter().any(|r| r.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.spec
    }
}

impl fmt::Display for PythonRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

fn split_operator(clause: &str) -> Option<(&str, &str)> {
    for op in ["~=", "==", "!=", ">=", "<=", ">", "<"] {
        if let Some(rest) = clause.strip_prefix(op) {
            let rest = rest.trim();
            if rest.is_empty() || rest.starts_with('=') {
                return None;
            }
            return Some((op, rest));
        }
    }
    None
}

fn pad(version: &str) -> String {
    let mut parts: Vec<&str> = version.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    parts.join(".")
}

fn exact_or_wildcard(version: &str) -> String {
    match version.strip_suffix(".*") {
        Some(prefix) => format!("={}", prefix),
        None => format!("={}", pad(version)),
    }
}

fn compatible_release(version: &str) -> Result<Vec<String>, String> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() < 2 {
        return Err(format!("`~={}` needs at least two version components", version));
    }
    let prefix = &parts[..parts.len() - 1];
    Ok(vec![
        format!(">={}", pad(version)),
        format!("={}", prefix.join(".")),
    ])
}
