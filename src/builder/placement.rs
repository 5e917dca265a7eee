//! Placement and registration of built modules.
//!
//! A module named `pkg.sub.leaf` is installed at
//! `<dest_root>/pkg/sub/leaf<EXT_SUFFIX>`, which is exactly where the host
//! import system looks for it. Files this tool installed are recorded in a
//! small ledger (`.zigext-placed.json` in `dest_root`) so a later build may
//! replace them; anything else found at a destination is left alone.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::builder::cache::CompiledArtifact;
use crate::builder::fingerprint::Fingerprint;
use crate::core::target::module_path_parts;
use crate::error::PlacementError;
use crate::util::fs::{ensure_dir, same_contents, write_atomic};
use crate::util::hash::sha256_file;

/// Ledger of files placed by zigext, relative to the destination root.
pub const LEDGER_FILE: &str = ".zigext-placed.json";

/// Registration record written next to the placed modules.
pub const REGISTRATION_FILE: &str = "zigext-modules.json";

/// A module installed where the host loader will find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedModule {
    pub path: PathBuf,
    pub module_name: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    placed: BTreeMap<String, String>,
}

/// Places artifacts under one destination root.
#[derive(Debug)]
pub struct Placer {
    dest_root: PathBuf,
    ext_suffix: String,
    ledger: Mutex<()>,
}

impl Placer {
    pub fn new(dest_root: impl Into<PathBuf>, ext_suffix: impl Into<String>) -> Self {
        Placer {
            dest_root: dest_root.into(),
            ext_suffix: ext_suffix.into(),
            ledger: Mutex::new(()),
        }
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    /// Path relative to the destination root for a dotted module name.
    pub fn relative_path(&self, module_name: &str) -> PathBuf {
        let (dir, leaf) = module_path_parts(module_name);
        dir.join(format!("{}{}", leaf, self.ext_suffix))
    }

    /// Install `artifact` as `module_name`.
    pub fn place(
        &self,
        artifact: &CompiledArtifact,
        module_name: &str,
    ) -> Result<PlacedModule, PlacementError> {
        let rel = self.relative_path(module_name);
        let dest = self.dest_root.join(&rel);
        let key = ledger_key(&rel);

        let _guard = self
            .ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ledger_path = self.dest_root.join(LEDGER_FILE);
        let mut ledger = read_ledger(&ledger_path)?;

        let placed = PlacedModule {
            path: dest.clone(),
            module_name: module_name.to_string(),
            fingerprint: artifact.fingerprint.clone(),
        };

        if dest.symlink_metadata().is_ok() {
            if dest.is_file()
                && same_contents(&artifact.path, &dest)
                    .map_err(|e| PlacementError::from_io(&dest, e))?
            {
                tracing::debug!("{} is up to date", dest.display());
                if ledger.placed.get(&key) != Some(&artifact.sha256) {
                    ledger.placed.insert(key, artifact.sha256.clone());
                    write_ledger(&ledger_path, &ledger)?;
                }
                return Ok(placed);
            }

            let ours = match ledger.placed.get(&key) {
                Some(recorded) if dest.is_file() => {
                    let current =
                        sha256_file(&dest).map_err(|e| PlacementError::from_io(&dest, e))?;
                    &current == recorded
                }
                _ => false,
            };
            if !ours {
                return Err(PlacementError::Collision { path: dest });
            }
            tracing::debug!("replacing stale {}", dest.display());
        }

        install(&artifact.path, &dest)?;
        ledger.placed.insert(key, artifact.sha256.clone());
        write_ledger(&ledger_path, &ledger)?;

        tracing::debug!("placed `{}` at {}", module_name, dest.display());
        Ok(placed)
    }
}

fn ledger_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_ledger(path: &Path) -> Result<Ledger, PlacementError> {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(ledger) => Ok(ledger),
            Err(e) => {
                // An unreadable ledger only means nothing counts as ours.
                tracing::warn!("ignoring unreadable {}: {}", path.display(), e);
                Ok(Ledger::default())
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Ledger::default()),
        Err(e) => Err(PlacementError::from_io(path, e)),
    }
}

fn write_ledger(path: &Path, ledger: &Ledger) -> Result<(), PlacementError> {
    let json = serde_json::to_vec_pretty(ledger)
        .map_err(|e| PlacementError::from_io(path, io::Error::other(e)))?;
    if let Some(parent) = path.parent() {
        ensure_dir(parent).map_err(|e| PlacementError::from_io(parent, e))?;
    }
    write_atomic(path, &json).map_err(|e| PlacementError::from_io(path, e))
}

/// Hard-link (or copy) `src` to a temporary sibling of `dest`, then rename it
/// over `dest`.
fn install(src: &Path, dest: &Path) -> Result<(), PlacementError> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    ensure_dir(parent).map_err(|e| PlacementError::from_io(parent, e))?;

    let scratch = tempfile::Builder::new()
        .prefix(".zigext-")
        .tempdir_in(parent)
        .map_err(|e| PlacementError::from_io(parent, e))?;
    let staged = scratch.path().join("module");

    if let Err(e) = std::fs::hard_link(src, &staged) {
        tracing::trace!("hard link failed ({}), copying instead", e);
        std::fs::copy(src, &staged).map_err(|e| PlacementError::from_io(dest, e))?;
    }
    std::fs::rename(&staged, dest).map_err(|e| PlacementError::from_io(dest, e))
}

#[derive(Debug, Serialize)]
struct Registration<'a> {
    package: &'a str,
    version: &'a str,
    modules: Vec<RegisteredModule>,
}

#[derive(Debug, Serialize)]
struct RegisteredModule {
    name: String,
    path: String,
    fingerprint: Fingerprint,
}

/// Write `zigext-modules.json` describing the placed modules.
pub fn write_registration(
    dest_root: &Path,
    package: &str,
    version: &str,
    placed: &[PlacedModule],
) -> Result<PathBuf, PlacementError> {
    let mut modules: Vec<RegisteredModule> = placed
        .iter()
        .map(|m| RegisteredModule {
            name: m.module_name.clone(),
            path: ledger_key(m.path.strip_prefix(dest_root).unwrap_or(&m.path)),
            fingerprint: m.fingerprint.clone(),
        })
        .collect();
    modules.sort_by(|a, b| a.name.cmp(&b.name));

    let record = Registration {
        package,
        version,
        modules,
    };
    let path = dest_root.join(REGISTRATION_FILE);
    let json = serde_json::to_vec_pretty(&record)
        .map_err(|e| PlacementError::from_io(&path, io::Error::other(e)))?;
    ensure_dir(dest_root).map_err(|e| PlacementError::from_io(dest_root, e))?;
    write_atomic(&path, &json).map_err(|e| PlacementError::from_io(&path, e))?;
    Ok(path)
}
