//! Host runtime probe.
//!
//! The extension modules are built for one concrete Python interpreter. We ask
//! it, once, for everything that shapes the build: its version (checked
//! against `python-requires`), the extension filename suffix the import
//! system looks for, and where `Python.h` lives.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::util::config::HostSettings;
use crate::util::process::{find_executable, ProcessBuilder};

const PROBE_SCRIPT: &str = r#"
import json, sys, sysconfig
print(json.dumps({
    "version": "%d.%d.%d" % sys.version_info[:3],
    "ext_suffix": sysconfig.get_config_var("EXT_SUFFIX") or ".so",
    "include_dir": sysconfig.get_paths()["include"],
    "platform": sysconfig.get_platform(),
    "prefix": sys.base_prefix,
}))
"#;

/// What the host interpreter told us about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRuntime {
    pub interpreter: Option<PathBuf>,
    pub version: Version,
    /// Extension filename suffix, e.g. `.cpython-311-x86_64-linux-gnu.so`
    pub ext_suffix: String,
    /// Directory containing `Python.h`
    pub include_dir: PathBuf,
    pub platform: String,
    /// `sys.base_prefix`; Windows import libraries live under `<prefix>/libs`
    pub prefix: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    version: String,
    ext_suffix: String,
    include_dir: PathBuf,
    platform: String,
    prefix: PathBuf,
}

impl HostRuntime {
    /// Build a runtime description without running an interpreter.
    pub fn from_parts(
        version: Version,
        ext_suffix: impl Into<String>,
        include_dir: impl Into<PathBuf>,
    ) -> Self {
        HostRuntime {
            interpreter: None,
            version,
            ext_suffix: ext_suffix.into(),
            include_dir: include_dir.into(),
            platform: String::new(),
            prefix: PathBuf::new(),
        }
    }

    /// Run `python` and parse its self-description.
    pub fn probe(python: &Path) -> Result<Self, HostError> {
        let probe_err = |detail: String| HostError::Probe {
            path: python.to_path_buf(),
            detail,
        };

        let output = ProcessBuilder::new(python)
            .args(["-c", PROBE_SCRIPT])
            .exec()
            .map_err(|e| probe_err(e.to_string()))?;
        if !output.status.success() {
            return Err(probe_err(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| probe_err(format!("unexpected probe output: {}", e)))?;
        let version = Version::parse(&parsed.version)
            .map_err(|e| probe_err(format!("bad version `{}`: {}", parsed.version, e)))?;

        Ok(HostRuntime {
            interpreter: Some(python.to_path_buf()),
            version,
            ext_suffix: parsed.ext_suffix,
            include_dir: parsed.include_dir,
            platform: parsed.platform,
            prefix: parsed.prefix,
        })
    }

    /// Resolve the interpreter from settings or PATH, probe it, and apply the
    /// configured overrides.
    ///
    /// With no interpreter available, a fully configured `[host]` section
    /// (`ext-suffix`, `include-dir` and `version`) stands in for the probe.
    pub fn detect(settings: &HostSettings) -> Result<Self, HostError> {
        let mut tried = Vec::new();
        let interpreter = match settings.python {
            Some(ref p) => {
                tried.push(p.display().to_string());
                Some(p.clone()).filter(|p| p.is_file()).or_else(|| {
                    find_executable(&p.to_string_lossy())
                })
            }
            None => ["python3", "python"].iter().find_map(|name| {
                tried.push(name.to_string());
                find_executable(name)
            }),
        };

        let configured = (&settings.ext_suffix, &settings.include_dir, &settings.version);
        let mut runtime = match (interpreter, configured) {
            (Some(python), _) => {
                tracing::debug!("probing host interpreter {}", python.display());
                HostRuntime::probe(&python)?
            }
            (None, (Some(suffix), Some(include), Some(version))) => {
                tracing::debug!("no interpreter found, using configured host settings");
                HostRuntime::from_parts(version.clone(), suffix.clone(), include.clone())
            }
            (None, _) => return Err(HostError::NotFound { tried }),
        };

        if let Some(ref suffix) = settings.ext_suffix {
            runtime.ext_suffix = suffix.clone();
        }
        if let Some(ref include) = settings.include_dir {
            runtime.include_dir = include.clone();
        }
        Ok(runtime)
    }

    /// `pythonXY` import library name used when linking on Windows.
    pub fn windows_lib_name(&self) -> String {
        format!("python{}{}", self.version.major, self.version.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_configured_overrides_without_interpreter() {
        let tmp = TempDir::new().unwrap();
        let settings = HostSettings {
            python: Some(tmp.path().join("no-such-python")),
            ext_suffix: Some(".cpython-311-x86_64-linux-gnu.so".to_string()),
            include_dir: Some(tmp.path().join("include")),
            version: Some(Version::new(3, 11, 0)),
        };

        let host = HostRuntime::detect(&settings).unwrap();
        assert_eq!(host.ext_suffix, ".cpython-311-x86_64-linux-gnu.so");
        assert_eq!(host.include_dir, tmp.path().join("include"));
        assert_eq!(host.version, Version::new(3, 11, 0));
        assert!(host.interpreter.is_none());
    }

    #[test]
    fn test_missing_interpreter_without_overrides() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("no-such-python");
        let settings = HostSettings {
            python: Some(missing.clone()),
            ..Default::default()
        };

        match HostRuntime::detect(&settings).unwrap_err() {
            HostError::NotFound { tried } => {
                assert_eq!(tried, vec![missing.display().to_string()]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_parses_script_output() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let python = tmp.path().join("python3");
        std::fs::write(
            &python,
            "#!/bin/sh\ncat <<'EOF'\n{\"version\": \"3.11.4\", \"ext_suffix\": \".cpython-311-x86_64-linux-gnu.so\", \"include_dir\": \"/usr/include/python3.11\", \"platform\": \"linux-x86_64\", \"prefix\": \"/usr\"}\nEOF\n",
        )
        .unwrap();
        std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();

        let host = HostRuntime::probe(&python).unwrap();
        assert_eq!(host.version, Version::new(3, 11, 4));
        assert_eq!(host.ext_suffix, ".cpython-311-x86_64-linux-gnu.so");
        assert_eq!(host.include_dir, PathBuf::from("/usr/include/python3.11"));
        assert_eq!(host.windows_lib_name(), "python311");
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_failure_is_host_error() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let python = tmp.path().join("python3");
        std::fs::write(&python, "#!/bin/sh\necho broken >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = HostRuntime::probe(&python).unwrap_err();
        assert!(matches!(err, HostError::Probe { ref detail, .. } if detail == "broken"));
    }
}
