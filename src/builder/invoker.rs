//! Compiler invocation.
//!
//! The invoker runs the toolchain for one plan and reports what happened as
//! data. Compile errors, missing output, and cancellation are all
//! [`BuildResult`] variants rather than Rust errors, because the build driver
//! treats each of them as a normal per-target outcome.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::builder::diagnostics::{parse_diagnostics, CompilerDiagnostic};
use crate::builder::plan::BuildPlan;
use crate::builder::toolchain::ToolchainHandle;
use crate::util::cancel::CancelToken;
use crate::util::fs::ensure_dir;
use crate::util::process::ProcessOutcome;

/// Outcome of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum BuildResult {
    /// The artifact was written to the plan's staging path.
    Succeeded { artifact: PathBuf },
    Failed { diagnostics: Vec<CompilerDiagnostic> },
    Cancelled,
}

impl BuildResult {
    fn failed(text: impl Into<String>) -> Self {
        BuildResult::Failed {
            diagnostics: vec![CompilerDiagnostic::raw(text)],
        }
    }
}

/// Something that can turn a plan into an artifact.
///
/// The build driver only talks to this trait, so tests can count or stall
/// compilations without a real toolchain.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        plan: &BuildPlan,
        toolchain: &ToolchainHandle,
        cancel: &CancelToken,
    ) -> BuildResult;
}

/// Runs `zig build-lib`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZigCompiler;

impl ZigCompiler {
    pub fn new() -> Self {
        ZigCompiler
    }
}

impl Compiler for ZigCompiler {
    fn compile(
        &self,
        plan: &BuildPlan,
        toolchain: &ToolchainHandle,
        cancel: &CancelToken,
    ) -> BuildResult {
        if cancel.is_cancelled() {
            return BuildResult::Cancelled;
        }

        let output = plan.output();
        let scratch = match prepare_staging(plan) {
            Ok(dir) => dir,
            Err(e) => {
                return BuildResult::failed(format!(
                    "failed to prepare staging directory for {}: {}",
                    output.display(),
                    e
                ))
            }
        };

        let file_name = output
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(plan.module_name()));
        let emit = scratch.path().join(file_name);

        let process = toolchain.build_lib_command(plan, &emit).into_process();
        tracing::debug!("running {}", process.display_command());

        let out = match process.exec_cancellable(cancel) {
            Ok(ProcessOutcome::Finished(out)) => out,
            Ok(ProcessOutcome::Cancelled) => {
                tracing::debug!("compilation of `{}` cancelled", plan.module_name());
                return BuildResult::Cancelled;
            }
            Err(e) => {
                return BuildResult::failed(format!(
                    "failed to run {}: {}",
                    toolchain.path().display(),
                    e
                ))
            }
        };

        let stderr = String::from_utf8_lossy(&out.stderr);
        if !out.status.success() {
            let mut diagnostics = parse_diagnostics(&stderr);
            if diagnostics.is_empty() {
                diagnostics.push(CompilerDiagnostic::raw(format!(
                    "zig exited with {} and no output",
                    out.status
                )));
            }
            return BuildResult::Failed { diagnostics };
        }

        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!("zig: {}", line);
        }

        if !emit.is_file() {
            return BuildResult::failed(format!(
                "zig exited successfully but produced no artifact at {}",
                output.display()
            ));
        }

        match std::fs::rename(&emit, output) {
            Ok(()) => BuildResult::Succeeded {
                artifact: output.to_path_buf(),
            },
            Err(e) => BuildResult::failed(format!(
                "failed to move artifact to {}: {}",
                output.display(),
                e
            )),
        }
    }
}

/// Create the staging and zig cache directories, plus a scratch directory
/// next to the output that is removed on drop.
fn prepare_staging(plan: &BuildPlan) -> io::Result<tempfile::TempDir> {
    let parent = plan.output().parent().unwrap_or(Path::new("."));
    ensure_dir(parent)?;
    ensure_dir(plan.zig_cache_dir())?;
    tempfile::Builder::new().prefix(".stage-").tempdir_in(parent)
}
