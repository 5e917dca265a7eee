//! Zig extension-module build pipeline.
//!
//! Resolver -> toolchain -> plan + fingerprint -> cache -> invoker ->
//! placement. The driver in `ops::zigext_build` strings these together.

pub mod cache;
pub mod context;
pub mod diagnostics;
pub mod events;
pub mod executor;
pub mod fingerprint;
pub mod host;
pub mod imports;
pub mod invoker;
pub mod placement;
pub mod plan;
pub mod resolver;
pub mod toolchain;

pub use cache::{ArtifactCache, CacheOutcome, CompiledArtifact, PrunePolicy, PruneReport};
pub use context::BuildContext;
pub use diagnostics::CompilerDiagnostic;
pub use events::{BuildEvent, TargetState};
pub use executor::BuildExecutor;
pub use fingerprint::Fingerprint;
pub use host::HostRuntime;
pub use invoker::{BuildResult, Compiler, ZigCompiler};
pub use placement::{PlacedModule, Placer};
pub use plan::BuildPlan;
pub use toolchain::{CommandSpec, ToolchainHandle, ToolchainLocator};
