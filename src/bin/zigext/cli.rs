//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use zigext::OptimizeMode;

/// zigext - build Zig sources into Python extension modules
#[derive(Parser)]
#[command(name = "zigext")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile and place the package's extension modules
    Build(BuildArgs),

    /// Print resolved build plans and fingerprints as JSON
    Plan(PlanArgs),

    /// Show the located zig toolchain and host Python
    Toolchain(ToolchainArgs),

    /// Manage the artifact cache
    Cache(CacheArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Where to find the package and its tools.
#[derive(Args, Clone, Default)]
pub struct PackageArgs {
    /// Path to Zigext.toml (or its directory)
    #[arg(long, value_name = "PATH")]
    pub manifest_path: Option<PathBuf>,

    /// zig executable to use
    #[arg(long, value_name = "PATH", env = "ZIGEXT_ZIG")]
    pub zig: Option<PathBuf>,

    /// Python interpreter to build for
    #[arg(long, value_name = "PATH", env = "ZIGEXT_PYTHON")]
    pub python: Option<PathBuf>,

    /// Cross-compile for this zig target triple
    #[arg(long, value_name = "TRIPLE")]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Directory to place modules in
    #[arg(long, value_name = "DIR", conflicts_with = "inplace")]
    pub out_dir: Option<PathBuf>,

    /// Place modules next to the sources
    #[arg(long)]
    pub inplace: bool,

    /// Optimization mode for every module (Debug, ReleaseSafe, ReleaseFast, ReleaseSmall)
    #[arg(long, value_name = "MODE")]
    pub optimize: Option<OptimizeMode>,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Keep building other modules after a failure
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Output format for build messages
    #[arg(long, value_enum, default_value_t = MessageFormatArg::Human)]
    pub message_format: MessageFormatArg,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormatArg {
    Human,
    Json,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Optimization mode for every module
    #[arg(long, value_name = "MODE")]
    pub optimize: Option<OptimizeMode>,
}

#[derive(Args)]
pub struct ToolchainArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Print the cache directory
    Path,

    /// List cached artifacts, most recently used first
    List,

    /// Evict least recently used artifacts
    Prune(PruneArgs),

    /// Remove every cached artifact
    Clean,
}

#[derive(Args)]
pub struct PruneArgs {
    /// Keep the cache at or below this many bytes
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Drop artifacts unused for this many days
    #[arg(long, value_name = "DAYS")]
    pub max_age_days: Option<u64>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
