//! Discovery of the local files a compilation reads besides its declared
//! sources.
//!
//! Zig names file dependencies with string literals (`@import`,
//! `@embedFile`, `@cInclude`) and C headers name theirs with
//! `#include "..."`. Following those references transitively yields every
//! local file whose content can change the artifact. Module imports such as
//! `@import("std")` and `#include <...>` are not followed.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::util::fs::absolutize;

static ZIG_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(?P<kind>import|embedFile|cInclude)\s*\(\s*"(?P<path>[^"]+)"\s*\)"#)
        .expect("import regex is valid")
});

static C_INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*#\s*include\s*"(?P<path>[^"]+)""#).expect("include regex is valid")
});

/// Extensions of files scanned for further references.
const SCANNED: &[&str] = &["zig", "zon", "h", "hpp", "c"];

#[derive(Debug, PartialEq, Eq)]
enum Reference {
    /// Relative to the referencing file only.
    File(String),
    /// Relative to the referencing file, then the include directories.
    Header(String),
}

fn references(file: &Path, text: &str) -> Vec<Reference> {
    let is_zig = matches!(
        file.extension().and_then(|e| e.to_str()),
        Some("zig") | Some("zon")
    );

    if is_zig {
        ZIG_REF
            .captures_iter(text)
            .filter_map(|caps| {
                let path = caps["path"].to_string();
                match &caps["kind"] {
                    "import" if path.ends_with(".zig") || path.ends_with(".zon") => {
                        Some(Reference::File(path))
                    }
                    "import" => None,
                    "embedFile" => Some(Reference::File(path)),
                    _ => Some(Reference::Header(path)),
                }
            })
            .collect()
    } else {
        C_INCLUDE
            .captures_iter(text)
            .map(|caps| Reference::Header(caps["path"].to_string()))
            .collect()
    }
}

fn resolve(reference: &Reference, dir: &Path, include_dirs: &[PathBuf]) -> Option<PathBuf> {
    match reference {
        Reference::File(name) => Some(absolutize(dir, Path::new(name))).filter(|p| p.is_file()),
        Reference::Header(name) => std::iter::once(dir)
            .chain(include_dirs.iter().map(PathBuf::as_path))
            .map(|base| absolutize(base, Path::new(name)))
            .find(|p| p.is_file()),
    }
}

/// Files reachable from `sources` through local references, excluding the
/// sources themselves, sorted by path.
///
/// Unreadable files and references that do not resolve to an existing file
/// are skipped; the compiler reports those.
pub fn collect_dependencies(sources: &[PathBuf], include_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let declared: BTreeSet<&PathBuf> = sources.iter().collect();
    let mut seen: BTreeSet<PathBuf> = sources.iter().cloned().collect();
    let mut queue: VecDeque<PathBuf> = sources.iter().cloned().collect();

    while let Some(file) = queue.pop_front() {
        let scanned = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SCANNED.contains(&ext));
        if !scanned {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file) else {
            continue;
        };
        let dir = file.parent().unwrap_or(Path::new("."));

        for reference in references(&file, &text) {
            if let Some(found) = resolve(&reference, dir, include_dirs) {
                if seen.insert(found.clone()) {
                    tracing::trace!("{} references {}", file.display(), found.display());
                    queue.push_back(found);
                }
            }
        }
    }

    seen.into_iter().filter(|p| !declared.contains(p)).collect()
}
