//! Build targets - resolved extension module declarations.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Zig optimization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OptimizeMode {
    Debug,
    ReleaseSafe,
    #[default]
    ReleaseFast,
    ReleaseSmall,
}

impl OptimizeMode {
    pub const ALL: [OptimizeMode; 4] = [
        OptimizeMode::Debug,
        OptimizeMode::ReleaseSafe,
        OptimizeMode::ReleaseFast,
        OptimizeMode::ReleaseSmall,
    ];

    /// The value passed to `zig -O`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizeMode::Debug => "Debug",
            OptimizeMode::ReleaseSafe => "ReleaseSafe",
            OptimizeMode::ReleaseFast => "ReleaseFast",
            OptimizeMode::ReleaseSmall => "ReleaseSmall",
        }
    }
}

impl fmt::Display for OptimizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OptimizeMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown optimization mode `{}` (expected one of: Debug, ReleaseSafe, ReleaseFast, ReleaseSmall)",
                    s
                )
            })
    }
}

/// A resolved extension module. Immutable once created by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildTarget {
    name: String,
    sources: Vec<PathBuf>,
    extra_args: Vec<String>,
    optimize: OptimizeMode,
}

impl BuildTarget {
    pub(crate) fn new(
        name: String,
        sources: Vec<PathBuf>,
        extra_args: Vec<String>,
        optimize: OptimizeMode,
    ) -> Self {
        BuildTarget {
            name,
            sources,
            extra_args,
            optimize,
        }
    }

    /// Dotted module name, e.g. `pkg.fast`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute source paths, in declaration order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Pass-through compiler arguments after dedup.
    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn optimize(&self) -> OptimizeMode {
        self.optimize
    }
}

/// Check that `name` is a dotted sequence of identifiers.
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
                }
                _ => false,
            }
        })
}

/// Relative path of a dotted module: `a.b.c` -> `a/b`, `c`.
pub fn module_path_parts(name: &str) -> (PathBuf, &str) {
    let mut parts: Vec<&str> = name.split('.').collect();
    let leaf = parts.pop().unwrap_or(name);
    let dir: PathBuf = parts.iter().collect();
    (dir, leaf)
}

/// Flags whose value is the following argument.
const PAIRED_FLAGS: &[&str] = &[
    "-I", "-L", "-l", "-D", "-isystem", "-rpath", "-framework", "-target", "-mcpu", "-mcmodel",
    "--name",
];

/// Paired flags that can only take effect once; a later occurrence replaces
/// an earlier one regardless of value.
const SINGLE_VALUED_FLAGS: &[&str] = &["-target", "-mcpu", "-mcmodel", "--name"];

/// One logical argument: a flag alone or a flag with its separate value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArgUnit {
    key: String,
    args: Vec<String>,
}

fn split_units(args: &[String]) -> Vec<ArgUnit> {
    let mut units = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        if PAIRED_FLAGS.contains(&arg.as_str()) {
            if let Some(value) = iter.next() {
                let key = if SINGLE_VALUED_FLAGS.contains(&arg.as_str()) {
                    arg.clone()
                } else if arg == "-D" {
                    format!("-D{}", define_name(value))
                } else {
                    format!("{} {}", arg, value)
                };
                units.push(ArgUnit {
                    key,
                    args: vec![arg.clone(), value.clone()],
                });
                continue;
            }
        }

        let key = match arg.strip_prefix("-D") {
            Some(define) if !define.is_empty() => format!("-D{}", define_name(define)),
            _ => arg.clone(),
        };
        units.push(ArgUnit {
            key,
            args: vec![arg.clone()],
        });
    }

    units
}

fn define_name(define: &str) -> &str {
    define.split_once('=').map(|(n, _)| n).unwrap_or(define)
}

/// Deduplicate arguments, keeping each logical argument at the position of
/// its last occurrence.
///
/// Defines are keyed by name, so `-DMODE=a -DMODE=b` keeps only `-DMODE=b`.
pub fn dedup_last_wins(args: &[String]) -> Vec<String> {
    let units = split_units(args);
    let mut kept: Vec<&ArgUnit> = Vec::with_capacity(units.len());

    for (i, unit) in units.iter().enumerate() {
        let superseded = units[i + 1..].iter().any(|later| later.key == unit.key);
        if !superseded {
            kept.push(unit);
        }
    }

    kept.into_iter().flat_map(|u| u.args.iter().cloned()).collect()
}

/// Strip optimization overrides out of a raw argument list.
///
/// Recognized spellings: `-DOptimize=<Mode>`, `-O<Mode>`, `-O <Mode>`. The
/// last override wins. Returns the mode (if any) and the remaining arguments.
pub fn extract_optimize(args: &[String]) -> Result<(Option<OptimizeMode>, Vec<String>), String> {
    let mut mode = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let value = if let Some(v) = arg.strip_prefix("-DOptimize=") {
            Some(v.to_string())
        } else if arg == "-O" {
            match iter.next() {
                Some(v) => Some(v.clone()),
                None => return Err("`-O` is missing its optimization mode".to_string()),
            }
        } else if let Some(v) = arg.strip_prefix("-O") {
            Some(v.to_string())
        } else {
            None
        };

        match value {
            Some(v) => mode = Some(v.parse::<OptimizeMode>()?),
            None => rest.push(arg.clone()),
        }
    }

    Ok((mode, rest))
}
