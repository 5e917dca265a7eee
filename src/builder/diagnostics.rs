//! Parsing of toolchain diagnostics.
//!
//! Zig reports problems as `path:line:col: severity: message`, followed by a
//! source excerpt, a caret line and sometimes a `referenced by:` trace. Those
//! follow-up lines stay attached to the diagnostic they belong to. Anything
//! we cannot recognise is preserved verbatim as a [`CompilerDiagnostic::Raw`]
//! so callers can render both kinds uniformly.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::diagnostic::Severity;

static LOCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>.+?):(?P<line>\d+):(?P<col>\d+): (?P<sev>error|warning|note|info|help): (?P<msg>.*)$",
    )
    .expect("diagnostic regex is valid")
});

static UNLOCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<sev>error|warning): (?P<msg>.+)$").expect("diagnostic regex is valid")
});

/// One diagnostic from a compiler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CompilerDiagnostic {
    /// A diagnostic with a known source location.
    Structured {
        file: PathBuf,
        line: u32,
        column: u32,
        severity: Severity,
        message: String,
    },
    /// Output we could not attribute to a location, kept as-is.
    Raw { severity: Severity, text: String },
}

impl CompilerDiagnostic {
    pub fn raw(text: impl Into<String>) -> Self {
        CompilerDiagnostic::Raw {
            severity: Severity::Error,
            text: text.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CompilerDiagnostic::Structured { severity, .. } => *severity,
            CompilerDiagnostic::Raw { severity, .. } => *severity,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompilerDiagnostic::Structured { message, .. } => message,
            CompilerDiagnostic::Raw { text, .. } => text,
        }
    }

    fn push_line(&mut self, line: &str) {
        let body = match self {
            CompilerDiagnostic::Structured { message, .. } => message,
            CompilerDiagnostic::Raw { text, .. } => text,
        };
        body.push('\n');
        body.push_str(line);
    }
}

impl fmt::Display for CompilerDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerDiagnostic::Structured {
                file,
                line,
                column,
                severity,
                message,
            } => write!(
                f,
                "{}:{}:{}: {}: {}",
                file.display(),
                line,
                column,
                severity,
                message
            ),
            CompilerDiagnostic::Raw { text, .. } => f.write_str(text),
        }
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        "help" => Severity::Help,
        _ => Severity::Note,
    }
}

fn parse_line(line: &str) -> Option<CompilerDiagnostic> {
    if let Some(caps) = LOCATED.captures(line) {
        let (Ok(line_no), Ok(column)) = (caps["line"].parse(), caps["col"].parse()) else {
            return None;
        };
        return Some(CompilerDiagnostic::Structured {
            file: PathBuf::from(&caps["file"]),
            line: line_no,
            column,
            severity: parse_severity(&caps["sev"]),
            message: caps["msg"].to_string(),
        });
    }
    UNLOCATED.captures(line).map(|caps| CompilerDiagnostic::Raw {
        severity: parse_severity(&caps["sev"]),
        text: caps["msg"].to_string(),
    })
}

/// Parse toolchain stderr into diagnostics.
///
/// Located lines become `Structured`; bare `error: ...` lines become `Raw`
/// entries in order. Other non-blank lines are appended to the diagnostic
/// before them, and any that precede the first diagnostic are kept as one
/// leading `Raw` note. When nothing at all is recognised, the whole (trimmed)
/// output becomes a single `Raw` error, and empty output yields an empty list.
pub fn parse_diagnostics(stderr: &str) -> Vec<CompilerDiagnostic> {
    let mut diagnostics: Vec<CompilerDiagnostic> = Vec::new();
    let mut leading = Vec::new();

    for line in stderr.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if let Some(diag) = parse_line(line) {
            diagnostics.push(diag);
        } else if let Some(last) = diagnostics.last_mut() {
            last.push_line(line);
        } else {
            leading.push(line);
        }
    }

    if diagnostics.is_empty() {
        let text = stderr.trim();
        if !text.is_empty() {
            diagnostics.push(CompilerDiagnostic::raw(text));
        }
    } else if !leading.is_empty() {
        diagnostics.insert(
            0,
            CompilerDiagnostic::Raw {
                severity: Severity::Note,
                text: leading.join("\n"),
            },
        );
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zig_error() {
        let stderr = "\
/pkg/pyzigtest.zig:12:5: error: expected ';' after statement
    return a + b
    ^~~~~~
/pkg/pyzigtest.zig:3:1: note: function declared here
";
        let diags = parse_diagnostics(stderr);
        assert_eq!(diags.len(), 2);
        assert_eq!(
            diags[0],
            CompilerDiagnostic::Structured {
                file: PathBuf::from("/pkg/pyzigtest.zig"),
                line: 12,
                column: 5,
                severity: Severity::Error,
                message: "expected ';' after statement\n    return a + b\n    ^~~~~~".to_string(),
            }
        );
        assert_eq!(diags[1].severity(), Severity::Note);
        assert_eq!(diags[1].message(), "function declared here");
    }

    #[test]
    fn test_trailing_context_kept_with_its_diagnostic() {
        let stderr = "\
info: compiling for x86_64-linux
/pkg/mod.zig:2:5: error: unused local constant
    const x = 1;
    ^
referenced by:
    add: /pkg/mod.zig:9:5

error: ld.lld: undefined symbol: PyLong_FromLong
>>> referenced by mod.o
";
        let diags = parse_diagnostics(stderr);
        assert_eq!(diags.len(), 3);
        assert_eq!(
            diags[0],
            CompilerDiagnostic::Raw {
                severity: Severity::Note,
                text: "info: compiling for x86_64-linux".to_string(),
            }
        );
        assert_eq!(
            diags[1].message(),
            "unused local constant\n    const x = 1;\n    ^\nreferenced by:\n    add: /pkg/mod.zig:9:5"
        );
        assert_eq!(
            diags[2].message(),
            "ld.lld: undefined symbol: PyLong_FromLong\n>>> referenced by mod.o"
        );
    }

    #[test]
    fn test_windows_drive_letter_path() {
        let diags = parse_diagnostics("C:\\pkg\\mod.zig:4:9: warning: unused variable\n");
        match &diags[0] {
            CompilerDiagnostic::Structured { file, line, column, .. } => {
                assert_eq!(file, &PathBuf::from("C:\\pkg\\mod.zig"));
                assert_eq!((*line, *column), (4, 9));
            }
            other => panic!("expected structured diagnostic, got {:?}", other),
        }
    }

    #[test]
    fn test_unlocated_error_lines() {
        let diags = parse_diagnostics("error: ld.lld: undefined symbol: PyLong_FromLong\n");
        assert_eq!(
            diags,
            vec![CompilerDiagnostic::Raw {
                severity: Severity::Error,
                text: "ld.lld: undefined symbol: PyLong_FromLong".to_string(),
            }]
        );
    }

    #[test]
    fn test_unparsable_output_kept_verbatim() {
        let stderr = "Segmentation fault\nsomething went very wrong\n";
        let diags = parse_diagnostics(stderr);
        assert_eq!(
            diags,
            vec![CompilerDiagnostic::raw(
                "Segmentation fault\nsomething went very wrong"
            )]
        );
        assert_eq!(diags[0].to_string(), "Segmentation fault\nsomething went very wrong");
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_diagnostics("  \n").is_empty());
    }

    #[test]
    fn test_display_structured() {
        let diag = &parse_diagnostics("a.zig:1:2: error: boom")[0];
        assert_eq!(diag.to_string(), "a.zig:1:2: error: boom");
    }
}
