//! Implementation of `zigext build`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;

use crate::builder::cache::{CacheOutcome, CompiledArtifact};
use crate::builder::events::{BuildEvent, TargetState};
use crate::builder::fingerprint::Fingerprint;
use crate::builder::placement::{write_registration, PlacedModule, Placer};
use crate::builder::plan::BuildPlan;
use crate::builder::resolver::resolve;
use crate::builder::{BuildContext, BuildExecutor};
use crate::core::descriptor::PackageDescriptor;
use crate::core::target::{BuildTarget, OptimizeMode};
use crate::error::{BridgeError, CacheError, DescriptorError};
use crate::util::cancel::CancelToken;
use crate::util::fs::absolutize;

/// Where modules go when neither `--out-dir` nor `--inplace` is given.
pub const DEFAULT_OUT_DIR: &str = "build/lib";

/// How build progress is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageFormat {
    #[default]
    Human,
    /// One JSON event per line on stdout
    Json,
}

/// Options for the build command.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Destination root; relative paths resolve against the package root
    pub out_dir: Option<PathBuf>,

    /// Place modules next to the sources, in the package root
    pub inplace: bool,

    /// Replaces every target's declared optimization mode
    pub optimize: Option<OptimizeMode>,

    /// Number of parallel jobs
    pub jobs: Option<usize>,

    /// Cancel remaining targets after the first failure
    pub fail_fast: bool,

    pub message_format: MessageFormat,

    /// Show a progress bar
    pub progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            out_dir: None,
            inplace: false,
            optimize: None,
            jobs: None,
            fail_fast: true,
            message_format: MessageFormat::Human,
            progress: false,
        }
    }
}

impl BuildOptions {
    /// Destination root for placed modules.
    pub fn dest_root(&self, package_root: &Path) -> PathBuf {
        if self.inplace {
            return package_root.to_path_buf();
        }
        let out_dir = self
            .out_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));
        absolutize(package_root, &out_dir)
    }
}

/// Terminal state of one target.
#[derive(Debug, Clone)]
pub enum TargetOutcome {
    Placed { module: PlacedModule, fresh: bool },
    Failed { error: BridgeError },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub module: String,
    pub fingerprint: Option<Fingerprint>,
    pub outcome: TargetOutcome,
}

/// Result of building every target of a package.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub package: String,
    pub version: String,
    pub targets: Vec<TargetReport>,
    /// Registration record, when at least one module was placed
    pub registration: Option<PathBuf>,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn placed(&self) -> impl Iterator<Item = &PlacedModule> {
        self.targets.iter().filter_map(|t| match t.outcome {
            TargetOutcome::Placed { ref module, .. } => Some(module),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &BridgeError)> {
        self.targets.iter().filter_map(|t| match t.outcome {
            TargetOutcome::Failed { ref error } => Some((t.module.as_str(), error)),
            _ => None,
        })
    }

    pub fn cancelled_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Cancelled))
            .count()
    }

    /// Whether every target was placed.
    pub fn success(&self) -> bool {
        self.targets
            .iter()
            .all(|t| matches!(t.outcome, TargetOutcome::Placed { .. }))
    }

    /// Whether every target that was not placed was cancelled.
    pub fn interrupted(&self) -> bool {
        !self.success() && self.failures().next().is_none()
    }
}

/// Build every extension of `descriptor`, printing JSON events when asked.
pub fn build(
    ctx: &BuildContext,
    descriptor: &PackageDescriptor,
    package_root: &Path,
    opts: &BuildOptions,
    cancel: &CancelToken,
) -> Result<BuildReport> {
    let json = opts.message_format == MessageFormat::Json;
    build_with_events(ctx, descriptor, package_root, opts, cancel, |event| {
        if json {
            println!("{}", event.to_json());
        }
    })
}

/// Build every extension of `descriptor`, reporting events to `on_event`.
///
/// Descriptor, python-requires and cache-corruption failures abort the
/// whole build and are returned as a [`BridgeError`] inside the error.
/// Everything else is reported per target.
pub fn build_with_events(
    ctx: &BuildContext,
    descriptor: &PackageDescriptor,
    package_root: &Path,
    opts: &BuildOptions,
    cancel: &CancelToken,
    on_event: impl Fn(&BuildEvent) + Sync,
) -> Result<BuildReport> {
    let start = Instant::now();
    let package = &descriptor.package;

    let targets = resolve(descriptor, package_root, opts.optimize).map_err(BridgeError::from)?;
    check_python(descriptor, ctx)?;

    let package_id = BuildContext::package_id(&package.name, &package.version);
    on_event(&BuildEvent::started(
        package_id.as_str(),
        ctx.toolchain.target_triple(),
        targets.len(),
    ));
    tracing::info!(
        "Building {} ({} extension module{})",
        package_id,
        targets.len(),
        if targets.len() == 1 { "" } else { "s" }
    );

    let dest_root = opts.dest_root(package_root);
    let job = TargetJob {
        ctx,
        package_id: &package_id,
        package_root,
        placer: Placer::new(&dest_root, ctx.host.ext_suffix.clone()),
        cancel,
        fail_fast: opts.fail_fast,
        fatal: Mutex::new(None),
        on_event: &on_event,
    };

    let reports = BuildExecutor::new(opts.jobs)
        .show_progress(opts.progress && opts.message_format == MessageFormat::Human)
        .execute(&targets, |target, progress| {
            progress.started(target.name());
            let report = job.run(target);
            match report.outcome {
                TargetOutcome::Placed { .. } => progress.placed(),
                TargetOutcome::Failed { .. } => progress.failed(),
                TargetOutcome::Cancelled => progress.cancelled(),
            }
            report
        })?;

    if let Some(err) = job
        .fatal
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
    {
        return Err(BridgeError::from(err).into());
    }

    let placed: Vec<PlacedModule> = reports
        .iter()
        .filter_map(|t| match t.outcome {
            TargetOutcome::Placed { ref module, .. } => Some(module.clone()),
            _ => None,
        })
        .collect();
    let registration = if placed.is_empty() {
        None
    } else {
        let path = write_registration(&dest_root, &package.name, &package.version, &placed)
            .map_err(BridgeError::from)?;
        tracing::debug!("wrote registration {}", path.display());
        Some(path)
    };

    let report = BuildReport {
        package: package.name.clone(),
        version: package.version.clone(),
        targets: reports,
        registration,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    on_event(&BuildEvent::BuildFinished {
        success: report.success(),
        duration_ms: report.duration_ms,
        placed: placed.len() as u64,
        failed: report.failures().count() as u64,
        cancelled: report.cancelled_count() as u64,
    });

    Ok(report)
}

fn check_python(descriptor: &PackageDescriptor, ctx: &BuildContext) -> Result<(), BridgeError> {
    if let Some(req) = descriptor.python_requirement()? {
        if !req.matches(&ctx.host.version) {
            return Err(DescriptorError::UnsupportedPython {
                spec: req.to_string(),
                found: ctx.host.version.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Shared state for building the targets of one package.
struct TargetJob<'a, F> {
    ctx: &'a BuildContext,
    package_id: &'a str,
    package_root: &'a Path,
    placer: Placer,
    cancel: &'a CancelToken,
    fail_fast: bool,
    /// First cache corruption seen; aborts the build
    fatal: Mutex<Option<CacheError>>,
    on_event: &'a F,
}

impl<F: Fn(&BuildEvent) + Sync> TargetJob<'_, F> {
    fn transition(&self, target: &BuildTarget, state: TargetState, fp: Option<&Fingerprint>) {
        tracing::debug!("{}: {}", target.name(), state);
        (self.on_event)(&BuildEvent::state(
            target.name(),
            state,
            fp.map(|f| f.to_string()),
        ));
    }

    fn run(&self, target: &BuildTarget) -> TargetReport {
        self.transition(target, TargetState::Resolved, None);

        let (fingerprint, outcome) = self.build_target(target);
        let state = match outcome {
            TargetOutcome::Placed { .. } => TargetState::Placed,
            TargetOutcome::Failed { ref error } => {
                if let BridgeError::CompileFailure { ref diagnostics, .. } = *error {
                    for diag in diagnostics {
                        (self.on_event)(&BuildEvent::message(
                            self.package_id,
                            target.name(),
                            diag.clone(),
                        ));
                    }
                }
                if self.fail_fast {
                    self.cancel.cancel();
                }
                TargetState::Failed
            }
            TargetOutcome::Cancelled => TargetState::Cancelled,
        };
        self.transition(target, state, fingerprint.as_ref());

        TargetReport {
            module: target.name().to_string(),
            fingerprint,
            outcome,
        }
    }

    fn build_target(&self, target: &BuildTarget) -> (Option<Fingerprint>, TargetOutcome) {
        if self.cancel.is_cancelled() {
            return (None, TargetOutcome::Cancelled);
        }
        let ctx = self.ctx;
        self.transition(target, TargetState::Located, None);

        let plan = BuildPlan::new(target, &ctx.toolchain, &ctx.host, self.package_root);
        let fingerprint = match Fingerprint::compute(&plan, &ctx.toolchain) {
            Ok(fp) => fp,
            Err(e) => return (None, failed(e)),
        };
        let fp = Some(fingerprint.clone());

        let (artifact, fresh) = match self.obtain(target, &plan, &fingerprint) {
            Ok(Some(found)) => found,
            Ok(None) => return (fp, TargetOutcome::Cancelled),
            Err(outcome) => return (fp, outcome),
        };

        match self.placer.place(&artifact, target.name()) {
            Ok(module) => {
                tracing::info!(
                    "{} {} -> {}",
                    if fresh { "Compiled" } else { "Fresh" },
                    target.name(),
                    module.path.display()
                );
                (self.on_event)(&BuildEvent::artifact(
                    self.package_id,
                    target.name(),
                    vec![module.path.clone()],
                    fresh,
                ));
                (fp, TargetOutcome::Placed { module, fresh })
            }
            Err(e) => (fp, failed(e)),
        }
    }

    /// Cached artifact for the plan, compiling on a miss. `Ok(None)` means
    /// the compilation was cancelled.
    fn obtain(
        &self,
        target: &BuildTarget,
        plan: &BuildPlan,
        fingerprint: &Fingerprint,
    ) -> Result<Option<(CompiledArtifact, bool)>, TargetOutcome> {
        let ctx = self.ctx;
        let fp = Some(fingerprint);

        match ctx.cache.lookup(fingerprint) {
            Ok(Some(hit)) => {
                self.transition(target, TargetState::CacheHit, fp);
                return Ok(Some((hit, false)));
            }
            Ok(None) => self.transition(target, TargetState::CacheMiss, fp),
            Err(e) => return Err(self.cache_failure(e)),
        }

        let outcome = ctx.cache.compile_once(fingerprint, || {
            self.transition(target, TargetState::Compiling, fp);
            ctx.compiler.compile(plan, &ctx.toolchain, self.cancel)
        });

        match outcome {
            Ok(CacheOutcome::Hit(artifact)) => Ok(Some((artifact, false))),
            Ok(CacheOutcome::Built(artifact)) => {
                self.transition(target, TargetState::Succeeded, fp);
                Ok(Some((artifact, true)))
            }
            Ok(CacheOutcome::Failed(diagnostics)) => Err(failed(BridgeError::CompileFailure {
                module: target.name().to_string(),
                diagnostics,
            })),
            Ok(CacheOutcome::Cancelled) => Ok(None),
            Err(e) => Err(self.cache_failure(e)),
        }
    }

    fn cache_failure(&self, err: CacheError) -> TargetOutcome {
        if err.is_corruption() {
            tracing::error!("{}", err);
            let mut fatal = self
                .fatal
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            fatal.get_or_insert_with(|| err.clone());
            self.cancel.cancel();
        }
        failed(err)
    }
}

fn failed(err: impl Into<BridgeError>) -> TargetOutcome {
    TargetOutcome::Failed { error: err.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::cache::ArtifactCache;
    use crate::builder::host::HostRuntime;
    use crate::builder::placement::REGISTRATION_FILE;
    use crate::builder::toolchain::ToolchainHandle;
    use crate::test_support::fixtures::{PackageFixture, StubCompiler};
    use semver::Version;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const SUFFIX: &str = ".cpython-311-x86_64-linux-gnu.so";

    fn context(cache_root: &Path, compiler: Arc<StubCompiler>) -> BuildContext {
        let toolchain =
            ToolchainHandle::new(PathBuf::from("zig"), "0.13.0", "x86_64-linux-gnu").unwrap();
        let host = HostRuntime::from_parts(Version::new(3, 11, 4), SUFFIX, "/usr/include/python3.11");
        let cache = ArtifactCache::open(cache_root).unwrap();
        BuildContext::new(toolchain, host, Arc::new(cache), compiler)
    }

    fn run(
        ctx: &BuildContext,
        root: &Path,
        opts: &BuildOptions,
    ) -> (Result<BuildReport>, Vec<BuildEvent>) {
        let descriptor = PackageDescriptor::load(&root.join("Zigext.toml")).unwrap();
        let events = Mutex::new(Vec::new());
        let result = build_with_events(ctx, &descriptor, root, opts, &CancelToken::new(), |e| {
            events.lock().unwrap().push(e.clone())
        });
        (result, events.into_inner().unwrap())
    }

    fn states(events: &[BuildEvent], module: &str) -> Vec<TargetState> {
        events
            .iter()
            .filter_map(|e| match e {
                BuildEvent::TargetState { target, state, .. } if target == module => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_build_places_module_and_registers() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let (report, events) = run(&ctx, &root, &BuildOptions::default());
        let report = report.unwrap();

        assert!(report.success());
        assert_eq!(compiler.calls(), 1);
        let placed: Vec<_> = report.placed().collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(
            placed[0].path,
            root.join("build/lib").join(format!("pyzigtest{}", SUFFIX))
        );
        assert!(placed[0].path.is_file());
        assert_eq!(
            report.registration.as_deref(),
            Some(root.join("build/lib").join(REGISTRATION_FILE).as_path())
        );

        assert_eq!(
            states(&events, "pyzigtest"),
            vec![
                TargetState::Resolved,
                TargetState::Located,
                TargetState::CacheMiss,
                TargetState::Compiling,
                TargetState::Succeeded,
                TargetState::Placed,
            ]
        );
        assert!(matches!(events.first(), Some(BuildEvent::BuildStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(BuildEvent::BuildFinished { success: true, .. })
        ));
    }

    #[test]
    fn test_second_build_is_cache_hit() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        run(&ctx, &root, &BuildOptions::default()).0.unwrap();
        let (report, events) = run(&ctx, &root, &BuildOptions::default());
        let report = report.unwrap();

        assert_eq!(compiler.calls(), 1);
        assert!(matches!(
            report.targets[0].outcome,
            TargetOutcome::Placed { fresh: false, .. }
        ));
        assert_eq!(
            states(&events, "pyzigtest"),
            vec![
                TargetState::Resolved,
                TargetState::Located,
                TargetState::CacheHit,
                TargetState::Placed,
            ]
        );
    }

    #[test]
    fn test_source_change_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let first = run(&ctx, &root, &BuildOptions::default()).0.unwrap();
        std::fs::write(root.join("pyzigtest.zig"), "// changed\n").unwrap();
        let second = run(&ctx, &root, &BuildOptions::default()).0.unwrap();

        assert_eq!(compiler.calls(), 2);
        assert_ne!(first.targets[0].fingerprint, second.targets[0].fingerprint);
    }

    #[test]
    fn test_missing_source_never_invokes_compiler() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        std::fs::remove_file(root.join("pyzigtest.zig")).unwrap();
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let err = run(&ctx, &root, &BuildOptions::default()).0.unwrap_err();
        let err = err.downcast_ref::<BridgeError>().unwrap();
        assert!(matches!(
            err,
            BridgeError::Descriptor(DescriptorError::MissingSource { .. })
        ));
        assert_eq!(compiler.calls(), 0);
    }

    #[test]
    fn test_unsupported_python() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest()
            .python_requires(">=3.12")
            .write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let err = run(&ctx, &root, &BuildOptions::default()).0.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Descriptor(DescriptorError::UnsupportedPython { .. }))
        ));
        assert_eq!(compiler.calls(), 0);
    }

    #[test]
    fn test_compile_failure_reports_diagnostics() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new().fail_module("pyzigtest"));
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let (report, events) = run(&ctx, &root, &BuildOptions::default());
        let report = report.unwrap();

        assert!(!report.success());
        assert!(!report.interrupted());
        assert!(report.registration.is_none());
        let (module, err) = report.failures().next().unwrap();
        assert_eq!(module, "pyzigtest");
        assert_eq!(err.kind(), "compile-failure");
        assert!(events
            .iter()
            .any(|e| matches!(e, BuildEvent::CompilerMessage { .. })));
        assert_eq!(states(&events, "pyzigtest").last(), Some(&TargetState::Failed));

        // Failures are not cached.
        run(&ctx, &root, &BuildOptions::default()).0.unwrap();
        assert_eq!(compiler.calls(), 2);
    }

    #[test]
    fn test_fail_fast_cancels_siblings() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest()
            .extension("pyzigtest.slow", &["slow.zig"])
            .write(&tmp.path().join("pkg"));
        let compiler = Arc::new(
            StubCompiler::new()
                .fail_module("pyzigtest")
                .delay_module("pyzigtest.slow", Duration::from_secs(30)),
        );
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let opts = BuildOptions {
            jobs: Some(2),
            ..BuildOptions::default()
        };
        let report = run(&ctx, &root, &opts).0.unwrap();

        let slow = report
            .targets
            .iter()
            .find(|t| t.module == "pyzigtest.slow")
            .unwrap();
        assert!(matches!(slow.outcome, TargetOutcome::Cancelled));
        assert_eq!(ctx.cache.entries().unwrap().len(), 0);
    }

    #[test]
    fn test_no_fail_fast_builds_the_rest() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest()
            .extension("pyzigtest.other", &["other.zig"])
            .write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new().fail_module("pyzigtest"));
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let opts = BuildOptions {
            fail_fast: false,
            jobs: Some(1),
            ..BuildOptions::default()
        };
        let report = run(&ctx, &root, &opts).0.unwrap();

        assert_eq!(report.placed().count(), 1);
        assert_eq!(report.failures().count(), 1);
        assert!(report.registration.is_some());
    }

    #[test]
    fn test_inplace_and_dotted_names() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::new("pkg")
            .extension("pkg._native", &["native.zig"])
            .write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler);

        let opts = BuildOptions {
            inplace: true,
            ..BuildOptions::default()
        };
        let report = run(&ctx, &root, &opts).0.unwrap();
        let placed: Vec<_> = report.placed().collect();
        assert_eq!(placed[0].path, root.join("pkg").join(format!("_native{}", SUFFIX)));
    }

    #[test]
    fn test_optimize_override_changes_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());

        let debug = run(&ctx, &root, &BuildOptions::default()).0.unwrap();
        let release = run(
            &ctx,
            &root,
            &BuildOptions {
                optimize: Some(OptimizeMode::ReleaseSmall),
                ..BuildOptions::default()
            },
        )
        .0
        .unwrap();

        assert_eq!(compiler.calls(), 2);
        assert_ne!(debug.targets[0].fingerprint, release.targets[0].fingerprint);
    }

    #[test]
    fn test_pre_cancelled_build() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(&tmp.path().join("pkg"));
        let compiler = Arc::new(StubCompiler::new());
        let ctx = context(&tmp.path().join("cache"), compiler.clone());
        let descriptor = PackageDescriptor::load(&root.join("Zigext.toml")).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = build_with_events(
            &ctx,
            &descriptor,
            &root,
            &BuildOptions::default(),
            &cancel,
            |_| {},
        )
        .unwrap();

        assert!(report.interrupted());
        assert_eq!(compiler.calls(), 0);
    }

    #[test]
    fn test_dest_root() {
        let root = Path::new("/pkg");
        assert_eq!(BuildOptions::default().dest_root(root), PathBuf::from("/pkg/build/lib"));
        let opts = BuildOptions {
            out_dir: Some(PathBuf::from("/elsewhere")),
            ..BuildOptions::default()
        };
        assert_eq!(opts.dest_root(root), PathBuf::from("/elsewhere"));
        let opts = BuildOptions {
            inplace: true,
            ..BuildOptions::default()
        };
        assert_eq!(opts.dest_root(root), PathBuf::from("/pkg"));
    }
}
