//! User-facing diagnostic rendering.
//!
//! Compile failures are shown diagnostic by diagnostic with their locations;
//! every other failure kind gets a one-line classification plus detail.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builder::diagnostics::CompilerDiagnostic;
use crate::error::BridgeError;

/// Common suggestion messages.
pub mod suggestions {
    pub const NO_DESCRIPTOR: &str =
        "help: create a Zigext.toml in the package root, or pass --manifest-path";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
    Help,
}

impl Severity {
    fn styled(&self, color: bool) -> &'static str {
        match (self, color) {
            (Severity::Error, true) => "\x1b[1;31merror\x1b[0m",
            (Severity::Warning, true) => "\x1b[1;33mwarning\x1b[0m",
            (Severity::Note, true) => "\x1b[1;36mnote\x1b[0m",
            (Severity::Help, true) => "\x1b[1;32mhelp\x1b[0m",
            (Severity::Error, false) => "error",
            (Severity::Warning, false) => "warning",
            (Severity::Note, false) => "note",
            (Severity::Help, false) => "help",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.styled(false))
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Suggested fixes
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            severity: Severity::Error,
            suggestions: Vec::new(),
        }
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = format!("{}: {}\n", self.severity.styled(color), self.message);

        if !self.suggestions.is_empty() {
            output.push_str(&format!("{}: consider:\n", Severity::Help.styled(color)));
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Render one compiler diagnostic as a terminal line.
pub fn format_compiler_diagnostic(diag: &CompilerDiagnostic, color: bool) -> String {
    match diag {
        CompilerDiagnostic::Structured {
            file,
            line,
            column,
            severity,
            message,
        } => format!(
            "{}:{}:{}: {}: {}\n",
            file.display(),
            line,
            column,
            severity.styled(color),
            message
        ),
        CompilerDiagnostic::Raw { severity, text } => {
            format!("{}: {}\n", severity.styled(color), text)
        }
    }
}

/// Render a bridge error for the terminal.
pub fn format_bridge_error(err: &BridgeError, color: bool) -> String {
    match err {
        BridgeError::CompileFailure {
            module,
            diagnostics,
        } => {
            let mut out = Diagnostic::error(format!("could not compile `{}`", module)).format(color);
            for diag in diagnostics {
                out.push_str(&format_compiler_diagnostic(diag, color));
            }
            out
        }
        other => {
            let mut diag =
                Diagnostic::error(format!("[{}] {}", other.kind(), other));
            if let Some(help) = miette::Diagnostic::help(other) {
                diag = diag.with_suggestion(help.to_string());
            }
            diag.format(color)
        }
    }
}

/// Print a bridge error to stderr.
pub fn emit(err: &BridgeError, color: bool) {
    eprint!("{}", format_bridge_error(err, color));
}
