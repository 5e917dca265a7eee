//! Persistent, fingerprint-keyed artifact cache.
//!
//! Layout under the cache root:
//!
//! ```text
//! artifacts/<fingerprint>   compiled modules, immutable once stored
//! index.json                size, content hash and timestamps per entry
//! index.lock                guards index.json across processes
//! locks/<fingerprint>.lock  per-entry lock; exclusive while compiling
//! failures/<fingerprint>.json  last failed compile, read by lock waiters
//! tmp/                      staging for atomic inserts
//! ```
//!
//! Lock order is always: entry file lock, in-process entry guard, index.
//! Anything that deviates can deadlock against a concurrent `compile_once`.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::builder::diagnostics::CompilerDiagnostic;
use crate::builder::fingerprint::Fingerprint;
use crate::builder::invoker::BuildResult;
use crate::error::CacheError;
use crate::util::flock::{FileLock, LockMode};
use crate::util::fs::{ensure_dir, remove_file_if_exists, write_atomic};
use crate::util::hash::sha256_file;

const INDEX_VERSION: u32 = 1;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// A cached module, owned by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledArtifact {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the artifact bytes
    pub sha256: String,
    /// Unix seconds
    pub built_at: u64,
}

/// What `compile_once` produced for a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Already cached; nothing was compiled.
    Hit(CompiledArtifact),
    /// Compiled by this request (or the in-flight one it joined) and stored.
    Built(CompiledArtifact),
    Failed(Vec<CompilerDiagnostic>),
    Cancelled,
}

/// One line of `zigext cache list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub label: String,
    pub size: u64,
    pub built_at: u64,
    pub last_used: u64,
}

/// Eviction limits. Entries are evicted least recently used first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrunePolicy {
    pub max_size: Option<u64>,
    pub max_age: Option<Duration>,
}

impl PrunePolicy {
    /// Policy from user-facing limits. Absurd ages saturate instead of
    /// overflowing.
    pub fn from_limits(max_size: Option<u64>, max_age_days: Option<u64>) -> Self {
        PrunePolicy {
            max_size,
            max_age: max_age_days.map(|days| Duration::from_secs(days.saturating_mul(SECS_PER_DAY))),
        }
    }

    /// Whether any limit is set.
    pub fn is_limited(&self) -> bool {
        self.max_size.is_some() || self.max_age.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub removed: Vec<Fingerprint>,
    pub freed_bytes: u64,
    /// Entries that qualified but were in use
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    label: String,
    size: u64,
    sha256: String,
    built_at: u64,
    last_used: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheIndex {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<Fingerprint, IndexEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        CacheIndex {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

type FlightResult = Result<CacheOutcome, CacheError>;

/// An in-progress compilation other requests can wait on.
#[derive(Default)]
struct Flight {
    result: Mutex<Option<FlightResult>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, result: FlightResult) {
        let mut slot = lock(&self.result);
        if slot.is_none() {
            *slot = Some(result);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> FlightResult {
        let mut slot = lock(&self.result);
        loop {
            if let Some(ref result) = *slot {
                return result.clone();
            }
            slot = self
                .done
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Completes and unregisters a flight even if the leader unwinds.
struct FlightGuard<'a> {
    cache: &'a ArtifactCache,
    fingerprint: &'a Fingerprint,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.cache.flights).remove(self.fingerprint);
        self.flight.complete(Ok(CacheOutcome::Cancelled));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// A failed compile, kept so processes queued behind it do not repeat it.
#[derive(Debug, Serialize, Deserialize)]
struct FailureRecord {
    failed_at_ms: u64,
    diagnostics: Vec<CompilerDiagnostic>,
}

/// The artifact cache. Share one instance per process (behind `Arc` or a
/// reference); separate processes coordinate through file locks.
pub struct ArtifactCache {
    root: PathBuf,
    index_lock: Mutex<()>,
    guards: Mutex<HashMap<Fingerprint, Arc<RwLock<()>>>>,
    flights: Mutex<HashMap<Fingerprint, Arc<Flight>>>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("root", &self.root)
            .finish()
    }
}

impl ArtifactCache {
    /// Open (creating if needed) the cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        for dir in [
            root.join("artifacts"),
            root.join("tmp"),
            root.join("locks"),
            root.join("failures"),
        ] {
            ensure_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
        Ok(ArtifactCache {
            root,
            index_lock: Mutex::new(()),
            guards: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join("artifacts").join(fingerprint.as_str())
    }

    fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join("locks")
            .join(format!("{}.lock", fingerprint.as_str()))
    }

    fn failure_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join("failures")
            .join(format!("{}.json", fingerprint.as_str()))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn entry_lock(&self, fingerprint: &Fingerprint, mode: LockMode) -> Result<FileLock, CacheError> {
        let path = self.lock_path(fingerprint);
        FileLock::acquire(&path, mode).map_err(|e| CacheError::io(&path, e))
    }

    fn entry_guard(&self, fingerprint: &Fingerprint) -> Arc<RwLock<()>> {
        lock(&self.guards)
            .entry(fingerprint.clone())
            .or_default()
            .clone()
    }

    /// Run `f` against the index while holding both the in-process and the
    /// cross-process index locks. The index is rewritten only if `f` says so.
    fn with_index<R>(
        &self,
        f: impl FnOnce(&mut CacheIndex) -> (R, bool),
    ) -> Result<R, CacheError> {
        let _guard = lock(&self.index_lock);
        let lock_path = self.root.join("index.lock");
        let _flock = FileLock::acquire(&lock_path, LockMode::Exclusive)
            .map_err(|e| CacheError::io(&lock_path, e))?;

        let path = self.index_path();
        let mut index = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| CacheError::Index {
                path: path.clone(),
                detail: e.to_string(),
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let (result, changed) = f(&mut index);
        if changed {
            let json = serde_json::to_vec_pretty(&index).map_err(|e| CacheError::Index {
                path: path.clone(),
                detail: e.to_string(),
            })?;
            write_atomic(&path, &json).map_err(|e| CacheError::io(&path, e))?;
        }
        Ok(result)
    }

    /// Look up a fingerprint, verifying the stored content hash.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CompiledArtifact>, CacheError> {
        let _flock = self.entry_lock(fingerprint, LockMode::Shared)?;
        self.lookup_locked(fingerprint)
    }

    /// Lookup for callers already holding the entry's file lock.
    fn lookup_locked(&self, fingerprint: &Fingerprint) -> Result<Option<CompiledArtifact>, CacheError> {
        let guard = self.entry_guard(fingerprint);
        let _read = guard.read().unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(entry) = self.with_index(|index| (index.entries.get(fingerprint).cloned(), false))?
        else {
            return Ok(None);
        };

        let path = self.artifact_path(fingerprint);
        let actual = match sha256_file(&path) {
            Ok(hash) => hash,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "cache entry {} lost its artifact, dropping it",
                    fingerprint.short()
                );
                self.with_index(|index| ((), index.entries.remove(fingerprint).is_some()))?;
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        if actual != entry.sha256 {
            return Err(CacheError::Corruption {
                fingerprint: fingerprint.to_string(),
                detail: format!(
                    "stored artifact hashes to {} but the index records {}",
                    actual, entry.sha256
                ),
            });
        }

        let now = now_secs();
        self.with_index(|index| match index.entries.get_mut(fingerprint) {
            Some(e) => {
                e.last_used = now;
                ((), true)
            }
            None => ((), false),
        })?;

        tracing::trace!("cache hit {}", fingerprint.short());
        Ok(Some(CompiledArtifact {
            fingerprint: fingerprint.clone(),
            path,
            size: entry.size,
            sha256: entry.sha256,
            built_at: entry.built_at,
        }))
    }

    /// Insert `artifact` under `fingerprint`.
    ///
    /// Storing byte-identical content again is a no-op. Different content
    /// under an existing fingerprint is corruption and nothing is overwritten.
    pub fn store(&self, fingerprint: &Fingerprint, artifact: &Path) -> Result<CompiledArtifact, CacheError> {
        let _flock = self.entry_lock(fingerprint, LockMode::Exclusive)?;
        self.store_locked(fingerprint, artifact)
    }

    fn store_locked(&self, fingerprint: &Fingerprint, artifact: &Path) -> Result<CompiledArtifact, CacheError> {
        let guard = self.entry_guard(fingerprint);
        let _write = guard.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let sha256 = sha256_file(artifact).map_err(|e| CacheError::io(artifact, e))?;
        let dest = self.artifact_path(fingerprint);

        let existing = self.with_index(|index| (index.entries.get(fingerprint).cloned(), false))?;
        if let Some(entry) = existing {
            if entry.sha256 != sha256 {
                return Err(CacheError::Corruption {
                    fingerprint: fingerprint.to_string(),
                    detail: format!(
                        "refusing to replace stored content {} with different content {}",
                        entry.sha256, sha256
                    ),
                });
            }
            if dest.is_file() {
                return Ok(CompiledArtifact {
                    fingerprint: fingerprint.clone(),
                    path: dest,
                    size: entry.size,
                    sha256,
                    built_at: entry.built_at,
                });
            }
        }

        let tmp_dir = self.root.join("tmp");
        let mut staged =
            tempfile::NamedTempFile::new_in(&tmp_dir).map_err(|e| CacheError::io(&tmp_dir, e))?;
        let mut source = File::open(artifact).map_err(|e| CacheError::io(artifact, e))?;
        let size = io::copy(&mut source, staged.as_file_mut()).map_err(|e| CacheError::io(artifact, e))?;
        let permissions = source
            .metadata()
            .map_err(|e| CacheError::io(artifact, e))?
            .permissions();
        std::fs::set_permissions(staged.path(), permissions)
            .map_err(|e| CacheError::io(staged.path(), e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| CacheError::io(staged.path(), e))?;
        staged
            .persist(&dest)
            .map_err(|e| CacheError::io(&dest, e.error))?;

        let now = now_secs();
        let label = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = IndexEntry {
            label,
            size,
            sha256: sha256.clone(),
            built_at: now,
            last_used: now,
        };
        self.with_index(|index| {
            index.entries.insert(fingerprint.clone(), entry);
            ((), true)
        })?;

        tracing::debug!("cached {} ({} bytes)", fingerprint.short(), size);
        Ok(CompiledArtifact {
            fingerprint: fingerprint.clone(),
            path: dest,
            size,
            sha256,
            built_at: now,
        })
    }

    /// Produce the artifact for `fingerprint`, compiling at most once.
    ///
    /// Concurrent callers in this process join the in-flight request and get
    /// its outcome; other processes wait on the entry's file lock and then
    /// find the stored result. Failed or cancelled compilations store no
    /// artifact, but a failure is recorded so that a process which was
    /// already waiting gets the same diagnostics instead of compiling again.
    pub fn compile_once(
        &self,
        fingerprint: &Fingerprint,
        compile: impl FnOnce() -> BuildResult,
    ) -> Result<CacheOutcome, CacheError> {
        let (flight, leader) = {
            let mut flights = lock(&self.flights);
            match flights.get(fingerprint) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    flights.insert(fingerprint.clone(), flight.clone());
                    (flight, true)
                }
            }
        };

        if !leader {
            tracing::debug!("waiting for in-flight build of {}", fingerprint.short());
            return flight.wait();
        }

        let guard = FlightGuard {
            cache: self,
            fingerprint,
            flight,
        };
        let result = self.lead(fingerprint, compile);
        guard.flight.complete(result.clone());
        drop(guard);
        result
    }

    fn lead(
        &self,
        fingerprint: &Fingerprint,
        compile: impl FnOnce() -> BuildResult,
    ) -> Result<CacheOutcome, CacheError> {
        let wait_started = now_millis();
        let lock_path = self.lock_path(fingerprint);
        let (_flock, contended) = match FileLock::try_acquire(&lock_path, LockMode::Exclusive)
            .map_err(|e| CacheError::io(&lock_path, e))?
        {
            Some(flock) => (flock, false),
            None => {
                tracing::debug!("waiting for another process building {}", fingerprint.short());
                (self.entry_lock(fingerprint, LockMode::Exclusive)?, true)
            }
        };

        if let Some(hit) = self.lookup_locked(fingerprint)? {
            return Ok(CacheOutcome::Hit(hit));
        }

        if contended {
            if let Some(record) = self.read_failure(fingerprint) {
                if record.failed_at_ms >= wait_started {
                    tracing::debug!("{} failed while we waited", fingerprint.short());
                    return Ok(CacheOutcome::Failed(record.diagnostics));
                }
            }
        }

        match compile() {
            BuildResult::Succeeded { artifact } => {
                let marker = self.failure_path(fingerprint);
                remove_file_if_exists(&marker).map_err(|e| CacheError::io(&marker, e))?;
                let stored = self.store_locked(fingerprint, &artifact)?;
                Ok(CacheOutcome::Built(stored))
            }
            BuildResult::Failed { diagnostics } => {
                self.record_failure(fingerprint, &diagnostics);
                Ok(CacheOutcome::Failed(diagnostics))
            }
            BuildResult::Cancelled => Ok(CacheOutcome::Cancelled),
        }
    }

    /// Must be called with the entry's file lock held.
    fn record_failure(&self, fingerprint: &Fingerprint, diagnostics: &[CompilerDiagnostic]) {
        let path = self.failure_path(fingerprint);
        let record = FailureRecord {
            failed_at_ms: now_millis(),
            diagnostics: diagnostics.to_vec(),
        };
        let written = serde_json::to_vec(&record)
            .map_err(io::Error::from)
            .and_then(|bytes| write_atomic(&path, &bytes));
        if let Err(e) = written {
            tracing::warn!("could not record failure at {}: {}", path.display(), e);
        }
    }

    fn read_failure(&self, fingerprint: &Fingerprint) -> Option<FailureRecord> {
        let bytes = std::fs::read(self.failure_path(fingerprint)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn clear_failures(&self) -> Result<(), CacheError> {
        let dir = self.root.join("failures");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(&dir, e)),
        };
        for entry in entries {
            let path = entry.map_err(|e| CacheError::io(&dir, e))?.path();
            remove_file_if_exists(&path).map_err(|e| CacheError::io(&path, e))?;
        }
        Ok(())
    }

    /// All entries, most recently used first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries: Vec<CacheEntry> = self.with_index(|index| {
            let list = index
                .entries
                .iter()
                .map(|(fp, e)| CacheEntry {
                    fingerprint: fp.clone(),
                    label: e.label.clone(),
                    size: e.size,
                    built_at: e.built_at,
                    last_used: e.last_used,
                })
                .collect();
            (list, false)
        })?;
        entries.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(entries)
    }

    /// Evict entries per `policy`. Entries currently being read or compiled
    /// are skipped.
    pub fn prune(&self, policy: &PrunePolicy) -> Result<PruneReport, CacheError> {
        let mut entries = self.entries()?;
        entries.reverse();

        let now = now_secs();
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut report = PruneReport::default();

        for entry in entries {
            let expired = policy
                .max_age
                .is_some_and(|age| now.saturating_sub(entry.last_used) > age.as_secs());
            let oversize = policy.max_size.is_some_and(|max| total > max);
            if !expired && !oversize {
                continue;
            }

            if !self.try_evict(&entry.fingerprint)? {
                report.skipped += 1;
                continue;
            }

            let fingerprint = &entry.fingerprint;
            tracing::debug!("pruned {} ({} bytes)", fingerprint.short(), entry.size);
            total = total.saturating_sub(entry.size);
            report.freed_bytes += entry.size;
            report.removed.push(fingerprint.clone());
        }

        Ok(report)
    }

    /// Remove every entry that is not in use, plus recorded failures.
    pub fn clear(&self) -> Result<PruneReport, CacheError> {
        self.clear_failures()?;
        let mut report = PruneReport::default();
        for entry in self.entries()? {
            if self.try_evict(&entry.fingerprint)? {
                report.freed_bytes += entry.size;
                report.removed.push(entry.fingerprint);
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    /// Delete one entry unless a lookup, store or compile holds it.
    /// Returns whether it was removed.
    fn try_evict(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let lock_path = self.lock_path(fingerprint);
        let Some(_flock) = FileLock::try_acquire(&lock_path, LockMode::Exclusive)
            .map_err(|e| CacheError::io(&lock_path, e))?
        else {
            return Ok(false);
        };
        let guard = self.entry_guard(fingerprint);
        let _write = match guard.try_write() {
            Ok(w) => w,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(false),
        };

        let path = self.artifact_path(fingerprint);
        remove_file_if_exists(&path).map_err(|e| CacheError::io(&path, e))?;
        self.with_index(|index| ((), index.entries.remove(fingerprint).is_some()))?;
        Ok(true)
    }
}
