//! Build executor with progress reporting.
//!
//! Targets run on a dedicated rayon pool sized by `--jobs`, so one build's
//! parallelism never leaks into the global pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

/// Runs per-target work in parallel.
pub struct BuildExecutor {
    jobs: Option<usize>,
    show_progress: bool,
}

impl BuildExecutor {
    /// Create a new build executor. `None` jobs means one per CPU.
    pub fn new(jobs: Option<usize>) -> Self {
        BuildExecutor {
            jobs,
            show_progress: false,
        }
    }

    /// Show a progress bar on stderr for multi-target builds.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Apply `work` to every item, preserving input order in the output.
    pub fn execute<T, R, F>(&self, items: &[T], work: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T, &BuildProgress) -> R + Sync,
    {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("zigext-build-{}", i));
        if let Some(j) = self.jobs {
            builder = builder.num_threads(j.max(1));
        }
        let pool = builder.build().context("failed to start build thread pool")?;

        let bar = if self.show_progress && items.len() > 1 {
            let pb = ProgressBar::new(items.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .context("invalid progress template")?
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let progress = BuildProgress::new(bar.clone());
        let results = pool.install(|| {
            items
                .par_iter()
                .map(|item| work(item, &progress))
                .collect::<Vec<R>>()
        });

        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
        Ok(results)
    }
}

/// Thread-safe counters for finished targets, mirrored on the progress bar.
#[derive(Clone)]
pub struct BuildProgress {
    placed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    fn new(bar: Option<ProgressBar>) -> Self {
        BuildProgress {
            placed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
            bar,
        }
    }

    /// Note that work on `module` started.
    pub fn started(&self, module: &str) {
        if let Some(ref pb) = self.bar {
            pb.set_message(module.to_string());
        }
    }

    pub fn placed(&self) {
        self.placed.fetch_add(1, Ordering::SeqCst);
        self.tick();
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.tick();
    }

    pub fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.tick();
    }

    fn tick(&self) {
        if let Some(ref pb) = self.bar {
            pb.inc(1);
            pb.set_message(self.summary());
        }
    }

    fn summary(&self) -> String {
        let mut parts = vec![format!("{} placed", self.placed.load(Ordering::SeqCst))];
        for (count, label) in [(&self.failed, "failed"), (&self.cancelled, "cancelled")] {
            let n = count.load(Ordering::SeqCst);
            if n > 0 {
                parts.push(format!("{} {}", n, label));
            }
        }
        parts.join(", ")
    }
}
