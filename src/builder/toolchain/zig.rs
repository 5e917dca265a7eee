//! Parsing of `zig version` and `zig env` output.

use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

static ENV_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    // JSON (`"target": "..."`) up to 0.14, ZON (`.target = "..."`) after.
    Regex::new(r#"(?:"target"\s*:|\.target\s*=)\s*"([^"]+)""#).expect("target regex is valid")
});

/// Parse a `zig version` line, e.g. `0.13.0` or `0.14.0-dev.3445+6c3cbb0c8`.
pub fn parse_version(s: &str) -> Result<Version, String> {
    let trimmed = s.trim();
    Version::parse(trimmed).map_err(|e| format!("unrecognized zig version `{}`: {}", trimmed, e))
}

/// Extract the native target from `zig env` output and strip OS/ABI version
/// ranges: `x86_64-linux.6.5...6.5-gnu.2.39` -> `x86_64-linux-gnu`.
pub fn parse_env_target(output: &str) -> Option<String> {
    let raw = ENV_TARGET.captures(output)?.get(1)?.as_str();
    let triple = raw
        .split('-')
        .map(|part| part.split('.').next().unwrap_or(part))
        .collect::<Vec<_>>()
        .join("-");
    (!triple.is_empty()).then_some(triple)
}

/// Best-effort triple for the machine we are running on.
pub fn fallback_triple() -> String {
    let arch = match std::env::consts::ARCH {
        "x86" => "x86",
        other => other,
    };
    let (os, abi) = match std::env::consts::OS {
        "linux" if cfg!(target_env = "musl") => ("linux", "musl"),
        "linux" => ("linux", "gnu"),
        "windows" => ("windows", "msvc"),
        "macos" => ("macos", "none"),
        other => (other, "none"),
    };
    format!("{}-{}-{}", arch, os, abi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_version() {
        assert_eq!(parse_version("0.13.0\n").unwrap(), Version::new(0, 13, 0));
    }

    #[test]
    fn test_parse_dev_version() {
        let v = parse_version("0.14.0-dev.3445+6c3cbb0c8").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (0, 14, 0));
        assert!(!v.pre.is_empty());
    }

    #[test]
    fn test_parse_version_garbage() {
        assert!(parse_version("zig: command not found").is_err());
    }

    #[test]
    fn test_parse_env_target_json() {
        let json = r#"{
 "zig_exe": "/usr/bin/zig",
 "version": "0.13.0",
 "target": "x86_64-linux.6.5...6.5-gnu.2.39"
}"#;
        assert_eq!(parse_env_target(json).as_deref(), Some("x86_64-linux-gnu"));
    }

    #[test]
    fn test_parse_env_target_zon() {
        let zon = r#".{
    .zig_exe = "/opt/zig/zig",
    .target = "aarch64-macos.14.5...14.5-none",
}"#;
        assert_eq!(parse_env_target(zon).as_deref(), Some("aarch64-macos-none"));
    }

    #[test]
    fn test_parse_env_target_missing() {
        assert_eq!(parse_env_target("{}"), None);
    }

    #[test]
    fn test_fallback_triple_shape() {
        assert_eq!(fallback_triple().split('-').count(), 3);
    }
}
