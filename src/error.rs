//! Error taxonomy for the build bridge.
//!
//! Each component returns its own error type; [`BridgeError`] is the umbrella
//! the build driver reports. None of these are ever downgraded to warnings.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::builder::diagnostics::CompilerDiagnostic;

/// Malformed or inconsistent package descriptor. Not retryable.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum DescriptorError {
    #[error("failed to read package descriptor {path}: {detail}")]
    #[diagnostic(code(zigext::descriptor::read))]
    Read { path: PathBuf, detail: String },

    #[error("invalid package descriptor {path}: {detail}")]
    #[diagnostic(code(zigext::descriptor::parse))]
    Parse { path: PathBuf, detail: String },

    #[error("package `{package}` does not enable the zig build (set `build-zig = true`)")]
    #[diagnostic(code(zigext::descriptor::not_enabled))]
    BuildNotEnabled { package: String },

    #[error("package `{package}` declares no extension modules")]
    #[diagnostic(code(zigext::descriptor::no_extensions))]
    NoExtensions { package: String },

    #[error("invalid package version `{version}`: {detail}")]
    #[diagnostic(code(zigext::descriptor::version))]
    InvalidVersion { version: String, detail: String },

    #[error("invalid python-requires `{spec}`: {detail}")]
    #[diagnostic(code(zigext::descriptor::python_requires))]
    InvalidPythonRequires { spec: String, detail: String },

    #[error("host Python {found} does not satisfy python-requires `{spec}`")]
    #[diagnostic(
        code(zigext::descriptor::unsupported_python),
        help("select another interpreter with --python or ZIGEXT_PYTHON")
    )]
    UnsupportedPython { spec: String, found: String },

    #[error("invalid extension module name `{name}`")]
    #[diagnostic(
        code(zigext::descriptor::module_name),
        help("module names are dotted Python identifiers, e.g. `pkg._native`")
    )]
    InvalidModuleName { name: String },

    #[error("extension module `{module}` is declared more than once")]
    #[diagnostic(code(zigext::descriptor::duplicate_module))]
    DuplicateModule { module: String },

    #[error("extension module `{module}` has an empty source list")]
    #[diagnostic(code(zigext::descriptor::empty_sources))]
    EmptySources { module: String },

    #[error("source file for `{module}` does not exist: {path}")]
    #[diagnostic(code(zigext::descriptor::missing_source))]
    MissingSource { module: String, path: PathBuf },

    #[error("invalid compile arguments for `{module}`: {detail}")]
    #[diagnostic(code(zigext::descriptor::compile_args))]
    InvalidCompileArgs { module: String, detail: String },
}

/// No usable toolchain. Needs operator action.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ToolchainError {
    #[error("zig toolchain not found (searched: {})", format_paths(.searched))]
    #[diagnostic(
        code(zigext::toolchain::not_found),
        help("install zig, put it on PATH, or set ZIGEXT_ZIG / [toolchain] zig")
    )]
    NotFound { searched: Vec<PathBuf> },

    #[error("zig at {path} reports version {found}, which does not satisfy `{required}`")]
    #[diagnostic(code(zigext::toolchain::version_mismatch))]
    VersionMismatch {
        path: PathBuf,
        found: String,
        required: String,
    },

    #[error("invalid toolchain version requirement `{required}`: {detail}")]
    #[diagnostic(code(zigext::toolchain::requirement))]
    InvalidRequirement { required: String, detail: String },

    #[error("failed to query zig at {path}: {detail}")]
    #[diagnostic(code(zigext::toolchain::probe))]
    Probe { path: PathBuf, detail: String },
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no candidates)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Host interpreter could not be queried.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum HostError {
    #[error("no Python interpreter found (tried: {})", .tried.join(", "))]
    #[diagnostic(
        code(zigext::host::not_found),
        help("set ZIGEXT_PYTHON or [host] python")
    )]
    NotFound { tried: Vec<String> },

    #[error("failed to query Python at {path}: {detail}")]
    #[diagnostic(code(zigext::host::probe))]
    Probe { path: PathBuf, detail: String },
}

/// Artifact cache failure.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum CacheError {
    /// The fingerprint invariant would be violated. Fatal.
    #[error("artifact cache corruption for {fingerprint}: {detail}")]
    #[diagnostic(
        code(zigext::cache::corruption),
        help("run `zigext cache clean` and rebuild")
    )]
    Corruption { fingerprint: String, detail: String },

    #[error("artifact cache I/O error at {path}")]
    #[diagnostic(code(zigext::cache::io))]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("artifact cache index {path} is unreadable: {detail}")]
    #[diagnostic(code(zigext::cache::index))]
    Index { path: PathBuf, detail: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}

/// Placement failure. Possibly transient; never retried by the core.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum PlacementError {
    #[error("refusing to overwrite {path}: it was not placed by zigext")]
    #[diagnostic(
        code(zigext::placement::collision),
        help("remove the file or choose another --out-dir")
    )]
    Collision { path: PathBuf },

    #[error("permission denied writing {path}")]
    #[diagnostic(code(zigext::placement::permission))]
    PermissionDenied { path: PathBuf },

    #[error("failed to place module at {path}")]
    #[diagnostic(code(zigext::placement::io))]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl PlacementError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            PlacementError::PermissionDenied { path }
        } else {
            PlacementError::Io {
                path,
                source: Arc::new(source),
            }
        }
    }
}

/// Everything the build driver can report for a package or a target.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum BridgeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Host(#[from] HostError),

    #[error("compilation of `{module}` failed with {} diagnostic(s)", .diagnostics.len())]
    #[diagnostic(code(zigext::compile))]
    CompileFailure {
        module: String,
        diagnostics: Vec<CompilerDiagnostic>,
    },

    #[error("build of `{module}` was cancelled")]
    #[diagnostic(code(zigext::cancelled))]
    Cancelled { module: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Placement(#[from] PlacementError),
}

impl BridgeError {
    /// One-word classification used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Descriptor(_) => "descriptor",
            BridgeError::Toolchain(ToolchainError::VersionMismatch { .. }) => {
                "toolchain-version-mismatch"
            }
            BridgeError::Toolchain(_) => "toolchain-not-found",
            BridgeError::Host(_) => "host",
            BridgeError::CompileFailure { .. } => "compile-failure",
            BridgeError::Cancelled { .. } => "cancelled",
            BridgeError::Cache(CacheError::Corruption { .. }) => "cache-corruption",
            BridgeError::Cache(_) => "cache",
            BridgeError::Placement(_) => "placement",
        }
    }

    /// Whether a build driver may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Placement(_))
    }
}
