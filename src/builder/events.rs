//! Build event types for JSON output.
//!
//! This module defines the stable JSON schema for machine-readable build output.
//! These events are emitted when using `--message-format=json`, one JSON
//! object per line on stdout.
//!
//! # Event Types
//!
//! - `build-started`: A package build began
//! - `target-state`: A target moved to a new state
//! - `compiler-message`: The toolchain reported a diagnostic
//! - `compiler-artifact`: A module was placed
//! - `build-finished`: Build completed (success or failure)
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::builder::diagnostics::CompilerDiagnostic;

/// Lifecycle of one target within a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    Resolved,
    Located,
    CacheHit,
    CacheMiss,
    Compiling,
    Succeeded,
    Placed,
    Failed,
    Cancelled,
}

impl TargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Resolved => "resolved",
            TargetState::Located => "located",
            TargetState::CacheHit => "cache-hit",
            TargetState::CacheMiss => "cache-miss",
            TargetState::Compiling => "compiling",
            TargetState::Succeeded => "succeeded",
            TargetState::Placed => "placed",
            TargetState::Failed => "failed",
            TargetState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build event emitted during the build process.
///
/// Each event is serialized as a single JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    /// Build started event with metadata.
    #[serde(rename = "build-started")]
    BuildStarted {
        /// Package identifier (e.g., "pyzigtest v0.1.0")
        package_id: String,
        /// Target triple (e.g., "x86_64-linux-gnu")
        target_triple: String,
        /// Number of extension modules to build
        target_count: u64,
    },

    /// A target changed state.
    #[serde(rename = "target-state")]
    TargetState {
        /// Dotted module name
        target: String,
        state: TargetState,
        /// Cache key, once known
        #[serde(skip_serializing_if = "Option::is_none")]
        fingerprint: Option<String>,
    },

    /// A diagnostic reported by the toolchain.
    #[serde(rename = "compiler-message")]
    CompilerMessage {
        package_id: String,
        target: String,
        message: CompilerDiagnostic,
    },

    /// A module was placed where the host loader will find it.
    #[serde(rename = "compiler-artifact")]
    CompilerArtifact {
        package_id: String,
        target: String,
        /// Output filenames
        filenames: Vec<PathBuf>,
        /// Whether this was compiled now (vs taken from the cache)
        fresh: bool,
    },

    /// Build completed (success or failure).
    #[serde(rename = "build-finished")]
    BuildFinished {
        /// Whether every target was placed
        success: bool,
        /// Total build duration in milliseconds
        duration_ms: u64,
        placed: u64,
        failed: u64,
        cancelled: u64,
    },
}

impl BuildEvent {
    /// Create a build-started event.
    pub fn started(
        package_id: impl Into<String>,
        target_triple: impl Into<String>,
        target_count: usize,
    ) -> Self {
        BuildEvent::BuildStarted {
            package_id: package_id.into(),
            target_triple: target_triple.into(),
            target_count: target_count as u64,
        }
    }

    /// Create a state-transition event.
    pub fn state(target: impl Into<String>, state: TargetState, fingerprint: Option<String>) -> Self {
        BuildEvent::TargetState {
            target: target.into(),
            state,
            fingerprint,
        }
    }

    /// Create a compiler message event.
    pub fn message(
        package_id: impl Into<String>,
        target: impl Into<String>,
        message: CompilerDiagnostic,
    ) -> Self {
        BuildEvent::CompilerMessage {
            package_id: package_id.into(),
            target: target.into(),
            message,
        }
    }

    /// Create a compiler artifact event.
    pub fn artifact(
        package_id: impl Into<String>,
        target: impl Into<String>,
        filenames: Vec<PathBuf>,
        fresh: bool,
    ) -> Self {
        BuildEvent::CompilerArtifact {
            package_id: package_id.into(),
            target: target.into(),
            filenames,
            fresh,
        }
    }

    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::diagnostic::Severity;

    #[test]
    fn test_artifact_serialization() {
        let event = BuildEvent::artifact(
            "pyzigtest v0.1.0",
            "pyzigtest",
            vec![PathBuf::from("pyzigtest.cpython-311-x86_64-linux-gnu.so")],
            true,
        );

        let json = event.to_json();
        assert!(json.contains(r#""reason":"compiler-artifact""#));
        assert!(json.contains(r#""target":"pyzigtest""#));
        assert!(json.contains(r#""fresh":true"#));
    }

    #[test]
    fn test_state_serialization() {
        let json = BuildEvent::state("pkg.fast", TargetState::CacheHit, Some("abc".into())).to_json();
        assert!(json.contains(r#""reason":"target-state""#));
        assert!(json.contains(r#""state":"cache-hit""#));
        assert!(json.contains(r#""fingerprint":"abc""#));

        let json = BuildEvent::state("pkg.fast", TargetState::Resolved, None).to_json();
        assert!(!json.contains("fingerprint"));
    }

    #[test]
    fn test_compiler_message_serialization() {
        let event = BuildEvent::message(
            "pyzigtest v0.1.0",
            "pyzigtest",
            CompilerDiagnostic::Structured {
                file: PathBuf::from("pyzigtest.zig"),
                line: 4,
                column: 2,
                severity: Severity::Error,
                message: "boom".to_string(),
            },
        );

        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["reason"], "compiler-message");
        assert_eq!(value["message"]["kind"], "structured");
        assert_eq!(value["message"]["severity"], "error");
        assert_eq!(value["message"]["line"], 4);
    }

    #[test]
    fn test_finished_serialization() {
        let event = BuildEvent::BuildFinished {
            success: false,
            duration_ms: 1200,
            placed: 1,
            failed: 1,
            cancelled: 0,
        };
        let json = event.to_json();
        assert!(json.contains(r#""reason":"build-finished""#));
        assert!(json.contains(r#""success":false"#));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TargetState::Placed.to_string(), "placed");
        assert_eq!(TargetState::CacheMiss.to_string(), "cache-miss");
    }
}
