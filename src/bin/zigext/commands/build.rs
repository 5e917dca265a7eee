//! `zigext build` command

use anyhow::Result;

use super::load_package;
use crate::cli::{BuildArgs, MessageFormatArg};
use zigext::builder::{BuildContext, PrunePolicy};
use zigext::ops::zigext_build::{build, BuildOptions, MessageFormat, TargetOutcome};
use zigext::util::diagnostic::emit;
use zigext::util::{CancelToken, GlobalContext};

/// Exit status when every unfinished module was cancelled.
pub const EXIT_CANCELLED: i32 = 130;

pub fn execute(args: BuildArgs, gctx: &GlobalContext) -> Result<i32> {
    let pkg = load_package(gctx, &args.package)?;
    let config = &pkg.config;

    let cache_root = gctx.cache_dir(config);
    let ctx = BuildContext::init(config, &cache_root)?;

    let message_format = match args.message_format {
        MessageFormatArg::Human => MessageFormat::Human,
        MessageFormatArg::Json => MessageFormat::Json,
    };

    // CLI > config > defaults
    let opts = BuildOptions {
        out_dir: args.out_dir.or_else(|| config.build.out_dir.clone()),
        inplace: args.inplace,
        optimize: args.optimize.or(config.build.optimize),
        jobs: args.jobs.or(config.build.jobs),
        fail_fast: !args.no_fail_fast,
        message_format,
        progress: !gctx.is_verbose(),
    };

    // Ctrl-C cancels in-flight compiles; their children are killed and
    // nothing partial reaches the cache.
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if !on_interrupt.is_cancelled() {
            eprintln!("\nCancelling...");
        }
        on_interrupt.cancel();
    }) {
        tracing::debug!("could not install interrupt handler: {}", e);
    }
    let report = build(&ctx, &pkg.descriptor, &pkg.root, &opts, &cancel)?;

    for target in &report.targets {
        match target.outcome {
            TargetOutcome::Placed { ref module, fresh } => {
                if message_format == MessageFormat::Human {
                    eprintln!(
                        "    {} `{}` -> {}",
                        if fresh { "Finished" } else { "   Fresh" },
                        target.module,
                        module.path.display()
                    );
                }
            }
            TargetOutcome::Failed { ref error } => emit(error, gctx.color()),
            TargetOutcome::Cancelled => {
                tracing::debug!("`{}` was cancelled", target.module);
            }
        }
    }

    let policy = PrunePolicy::from_limits(config.cache.max_size, config.cache.max_age_days);
    if policy.is_limited() {
        let pruned = ctx.cache.prune(&policy)?;
        if !pruned.removed.is_empty() {
            tracing::debug!(
                "pruned {} cached artifact(s), {} bytes",
                pruned.removed.len(),
                pruned.freed_bytes
            );
        }
    }

    if report.success() {
        if message_format == MessageFormat::Human {
            eprintln!(
                "    Finished {} v{} in {:.2}s",
                report.package,
                report.version,
                report.duration_ms as f64 / 1000.0
            );
        }
        return Ok(0);
    }

    let failed = report.failures().count();
    let cancelled = report.cancelled_count();
    if report.interrupted() {
        eprintln!("build of {} interrupted ({} cancelled)", report.package, cancelled);
        return Ok(EXIT_CANCELLED);
    }
    eprintln!(
        "error: could not build {} ({} failed, {} cancelled)",
        report.package, failed, cancelled
    );
    Ok(1)
}
