//! `zigext cache` command
//!
//! Inspect and trim the artifact cache shared by every package.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use super::load_config_near_cwd;
use crate::cli::{CacheArgs, CacheCommands, PruneArgs};
use zigext::builder::{ArtifactCache, PrunePolicy};
use zigext::error::BridgeError;
use zigext::util::fs::format_size;
use zigext::util::{Config, GlobalContext};

pub fn execute(args: CacheArgs, gctx: &GlobalContext) -> Result<i32> {
    let config = load_config_near_cwd(gctx);
    let root = gctx.cache_dir(&config);

    match args.command {
        CacheCommands::Path => println!("{}", root.display()),
        CacheCommands::List => list(&open(&root)?)?,
        CacheCommands::Prune(prune_args) => prune(&open(&root)?, prune_args, &config)?,
        CacheCommands::Clean => {
            let report = open(&root)?.clear().map_err(BridgeError::from)?;
            eprintln!(
                "     Removed {} cached artifact(s) from {}",
                report.removed.len(),
                root.display()
            );
            if report.skipped > 0 {
                eprintln!("     Skipped {} artifact(s) in use", report.skipped);
            }
        }
    }
    Ok(0)
}

fn open(root: &Path) -> Result<ArtifactCache> {
    Ok(ArtifactCache::open(root).map_err(BridgeError::from)?)
}

fn list(cache: &ArtifactCache) -> Result<()> {
    let entries = cache.entries().map_err(BridgeError::from)?;
    if entries.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut total = 0;
    for entry in &entries {
        total += entry.size;
        println!(
            "{}  {:>10}  {:<40}  used {}",
            entry.fingerprint.short(),
            format_size(entry.size),
            entry.label,
            ago(now.saturating_sub(entry.last_used))
        );
    }
    println!();
    println!("{} artifact(s), {}", entries.len(), format_size(total));
    Ok(())
}

fn prune(cache: &ArtifactCache, args: PruneArgs, config: &Config) -> Result<()> {
    let policy = PrunePolicy::from_limits(
        args.max_size.or(config.cache.max_size),
        args.max_age_days.or(config.cache.max_age_days),
    );
    if !policy.is_limited() {
        anyhow::bail!(
            "nothing to prune by\n\
             hint: pass --max-size or --max-age-days, or set them under [cache]"
        );
    }

    let report = cache.prune(&policy).map_err(BridgeError::from)?;
    eprintln!(
        "     Removed {} cached artifact(s), freed {}",
        report.removed.len(),
        format_size(report.freed_bytes)
    );
    if report.skipped > 0 {
        eprintln!("     Skipped {} artifact(s) in use", report.skipped);
    }
    Ok(())
}

fn ago(secs: u64) -> String {
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
