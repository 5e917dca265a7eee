//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use tempfile::TempDir;

pub const EXT_SUFFIX: &str = ".cpython-311-x86_64-linux-gnu.so";

pub const PYZIGTEST_MANIFEST: &str = r#"[package]
name = "pyzigtest"
version = "0.1.0"
python-requires = ">=3.10"
build-zig = true

[[extension]]
name = "pyzigtest"
sources = ["pyzigtest.zig"]
extra-compile-args = ["-DOptimize=Debug"]
"#;

/// A package directory, a fake zig and a private cache, all in one tempdir.
pub struct Sandbox {
    pub tmp: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let sandbox = Sandbox {
            tmp: TempDir::new().unwrap(),
        };
        fs::create_dir_all(sandbox.home()).unwrap();
        sandbox
    }

    /// The pyzigtest package with a host section that needs no Python.
    pub fn pyzigtest() -> Self {
        let sandbox = Sandbox::new();
        sandbox.write("pkg/Zigext.toml", PYZIGTEST_MANIFEST);
        sandbox.write("pkg/pyzigtest.zig", "pub fn add(a: i64, b: i64) i64 {\n    return a + b;\n}\n");
        sandbox.write(
            "pkg/.zigext/config.toml",
            &format!(
                "[host]\npython = \"/nonexistent/python3\"\next-suffix = \"{}\"\ninclude-dir = \"/usr/include/python3.11\"\nversion = \"3.11.4\"\n",
                EXT_SUFFIX
            ),
        );
        sandbox
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn package(&self) -> PathBuf {
        self.path().join("pkg")
    }

    pub fn home(&self) -> PathBuf {
        self.path().join("home")
    }

    pub fn cache(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn count_file(&self) -> PathBuf {
        self.path().join("zig-invocations")
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Number of `zig build-lib` runs so far.
    pub fn compile_count(&self) -> usize {
        fs::read_to_string(self.count_file())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Write a fake zig that reports `version` and, on `build-lib`, appends
    /// to the count file and either writes the artifact or fails.
    #[cfg(unix)]
    pub fn fake_zig(&self, version: &str, fail_with: Option<&str>) -> PathBuf {
        let failure = match fail_with {
            Some(msg) => format!("    echo '{}' >&2\n    exit 1\n", msg),
            None => String::new(),
        };
        self.write_zig(version, &failure)
    }

    /// Like [`Sandbox::fake_zig`], but `build-lib` sleeps for `secs` after
    /// bumping the count file.
    #[cfg(unix)]
    pub fn slow_zig(&self, version: &str, secs: u64) -> PathBuf {
        self.write_zig(version, &format!("    sleep {}\n", secs))
    }

    #[cfg(unix)]
    fn write_zig(&self, version: &str, before_emit: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
case "$1" in
version)
    echo "{version}"
    ;;
env)
    printf '{{"target": "x86_64-linux.6.5...6.5-gnu.2.39"}}\n'
    ;;
build-lib)
    echo build >> '{count}'
{before_emit}    emit=""
    for arg in "$@"; do
        case "$arg" in
            -femit-bin=*) emit="${{arg#-femit-bin=}}" ;;
        esac
    done
    echo "fake module" > "$emit"
    ;;
esac
"#,
            version = version,
            count = self.count_file().display(),
            before_emit = before_emit
        );

        let path = self.path().join("bin").join("zig");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// The zigext binary, isolated from the user's environment.
    pub fn zigext(&self) -> Command {
        let mut cmd = Command::cargo_bin("zigext").unwrap();
        cmd.current_dir(self.package())
            .env("HOME", self.home())
            .env("ZIGEXT_CACHE_DIR", self.cache())
            .env_remove("ZIGEXT_ZIG")
            .env_remove("ZIG")
            .env_remove("ZIGEXT_PYTHON")
            .env_remove("ZIGEXT_JOBS")
            .env_remove("RUST_LOG");
        cmd
    }
}
