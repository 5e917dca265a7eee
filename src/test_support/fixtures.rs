//! Test fixtures for common test scenarios.
//!
//! This module provides package fixtures, a stub [`Compiler`] that never
//! runs a toolchain, and a shell script that impersonates `zig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::builder::diagnostics::CompilerDiagnostic;
use crate::builder::invoker::{BuildResult, Compiler};
use crate::builder::plan::BuildPlan;
use crate::builder::toolchain::ToolchainHandle;
use crate::util::cancel::CancelToken;
use crate::util::diagnostic::Severity;

/// Fixture for a package directory with a `Zigext.toml`.
#[derive(Debug, Clone)]
pub struct PackageFixture {
    /// Package name.
    pub name: String,
    pub version: String,
    pub python_requires: Option<String>,
    pub build_zig: bool,
    /// (module name, sources, extra compile args)
    pub extensions: Vec<(String, Vec<String>, Vec<String>)>,
}

impl PackageFixture {
    /// Create a package with no extensions.
    pub fn new(name: impl Into<String>) -> Self {
        PackageFixture {
            name: name.into(),
            version: "0.1.0".to_string(),
            python_requires: None,
            build_zig: true,
            extensions: Vec::new(),
        }
    }

    /// The `pyzigtest` demo package.
    pub fn pyzigtest() -> Self {
        PackageFixture::new("pyzigtest")
            .python_requires(">=3.10")
            .extension_with_args("pyzigtest", &["pyzigtest.zig"], &["-DOptimize=Debug"])
    }

    pub fn python_requires(mut self, spec: impl Into<String>) -> Self {
        self.python_requires = Some(spec.into());
        self
    }

    pub fn build_zig(mut self, enabled: bool) -> Self {
        self.build_zig = enabled;
        self
    }

    pub fn extension(self, name: &str, sources: &[&str]) -> Self {
        self.extension_with_args(name, sources, &[])
    }

    pub fn extension_with_args(mut self, name: &str, sources: &[&str], args: &[&str]) -> Self {
        self.extensions.push((
            name.to_string(),
            sources.iter().map(|s| s.to_string()).collect(),
            args.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Render the descriptor.
    pub fn manifest(&self) -> String {
        let mut out = format!(
            "[package]\nname = \"{}\"\nversion = \"{}\"\nbuild-zig = {}\n",
            self.name, self.version, self.build_zig
        );
        if let Some(ref spec) = self.python_requires {
            out.push_str(&format!("python-requires = \"{}\"\n", spec));
        }
        for (name, sources, args) in &self.extensions {
            out.push_str(&format!(
                "\n[[extension]]\nname = \"{}\"\nsources = {}\nextra-compile-args = {}\n",
                name,
                toml_list(sources),
                toml_list(args)
            ));
        }
        out
    }

    /// Write the descriptor and every source file under `root`.
    pub fn write(&self, root: &Path) -> PathBuf {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("Zigext.toml"), self.manifest()).unwrap();
        for (name, sources, _) in &self.extensions {
            for source in sources {
                let path = root.join(source);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&path, format!("// {}\n{}", name, ZIG_SOURCE)).unwrap();
            }
        }
        root.to_path_buf()
    }
}

const ZIG_SOURCE: &str = "pub fn add(a: i64, b: i64) i64 {\n    return a + b;\n}\n";

fn toml_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("\"{}\"", s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// A [`Compiler`] that writes a small file instead of running zig.
#[derive(Debug, Default)]
pub struct StubCompiler {
    calls: AtomicUsize,
    failing: Vec<String>,
    delays: HashMap<String, Duration>,
}

impl StubCompiler {
    pub fn new() -> Self {
        StubCompiler::default()
    }

    /// Make compilations of `module` fail with one diagnostic.
    pub fn fail_module(mut self, module: &str) -> Self {
        self.failing.push(module.to_string());
        self
    }

    /// Make compilations of `module` take `delay`, or until cancelled.
    pub fn delay_module(mut self, module: &str, delay: Duration) -> Self {
        self.delays.insert(module.to_string(), delay);
        self
    }

    /// Number of compilations started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compiler for StubCompiler {
    fn compile(
        &self,
        plan: &BuildPlan,
        _toolchain: &ToolchainHandle,
        cancel: &CancelToken,
    ) -> BuildResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let module = plan.module_name();

        if let Some(delay) = self.delays.get(module) {
            let deadline = Instant::now() + *delay;
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return BuildResult::Cancelled;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        if cancel.is_cancelled() {
            return BuildResult::Cancelled;
        }

        if self.failing.iter().any(|m| m == module) {
            return BuildResult::Failed {
                diagnostics: vec![CompilerDiagnostic::Structured {
                    file: plan.sources()[0].clone(),
                    line: 1,
                    column: 1,
                    severity: Severity::Error,
                    message: "stub failure".to_string(),
                }],
            };
        }

        let output = plan.output();
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(
            output,
            format!("stub module {} {}\n", module, plan.flags().join(" ")),
        )
        .unwrap();
        BuildResult::Succeeded {
            artifact: output.to_path_buf(),
        }
    }
}

/// Behaviour of the script written by [`write_fake_zig_with`].
#[derive(Debug, Clone)]
pub struct FakeZig {
    /// Printed by `zig version`
    pub version: String,
    /// `target` field printed by `zig env`
    pub target: String,
    /// Print this to stderr and exit 1 from `build-lib`
    pub fail_with: Option<String>,
    /// Exit 0 from `build-lib` without writing the artifact
    pub skip_output: bool,
    /// Sleep before doing anything in `build-lib`
    pub sleep_secs: Option<u64>,
    /// Append a line here on every `build-lib`
    pub count_file: Option<PathBuf>,
    /// Write the working directory of `build-lib` here
    pub cwd_file: Option<PathBuf>,
}

impl Default for FakeZig {
    fn default() -> Self {
        FakeZig {
            version: "0.13.0".to_string(),
            target: "x86_64-linux.6.5...6.5-gnu.2.39".to_string(),
            fail_with: None,
            skip_output: false,
            sleep_secs: None,
            count_file: None,
            cwd_file: None,
        }
    }
}

impl FakeZig {
    fn script(&self) -> String {
        let mut build = String::new();
        if let Some(ref count) = self.count_file {
            build.push_str(&format!("    echo build >> '{}'\n", count.display()));
        }
        if let Some(ref cwd) = self.cwd_file {
            build.push_str(&format!("    pwd -P > '{}'\n", cwd.display()));
        }
        if let Some(secs) = self.sleep_secs {
            build.push_str(&format!("    sleep {}\n", secs));
        }
        if let Some(ref message) = self.fail_with {
            build.push_str(&format!("    echo '{}' >&2\n    exit 1\n", message));
        }
        if !self.skip_output {
            build.push_str(
                r#"    emit=""
    rest=""
    for arg in "$@"; do
        case "$arg" in
            -femit-bin=*) emit="${arg#-femit-bin=}" ;;
            *) rest="$rest $arg" ;;
        esac
    done
    mkdir -p "$(dirname "$emit")"
    printf 'fake zig module:%s\n' "$rest" > "$emit"
"#,
            );
        }

        format!(
            r#"#!/bin/sh
case "$1" in
version)
    echo "{version}"
    ;;
env)
    printf '{{\n "zig_exe": "%s",\n "version": "{version}",\n "target": "{target}"\n}}\n' "$0"
    ;;
build-lib)
{build}    ;;
*)
    echo "unsupported: $1" >&2
    exit 2
    ;;
esac
"#,
            version = self.version,
            target = self.target,
            build = build
        )
    }
}

/// Write a fake `zig` reporting `version` into `dir`.
#[cfg(unix)]
pub fn write_fake_zig(dir: &Path, version: &str) -> PathBuf {
    write_fake_zig_with(
        dir,
        FakeZig {
            version: version.to_string(),
            ..FakeZig::default()
        },
    )
}

/// Write a fake `zig` with the given behaviour into `dir`.
#[cfg(unix)]
pub fn write_fake_zig_with(dir: &Path, fake: FakeZig) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("zig");
    std::fs::write(&path, fake.script()).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::PackageDescriptor;
    use tempfile::TempDir;

    #[test]
    fn test_pyzigtest_fixture_parses() {
        let tmp = TempDir::new().unwrap();
        let root = PackageFixture::pyzigtest().write(tmp.path());
        let descriptor = PackageDescriptor::load(&root.join("Zigext.toml")).unwrap();

        assert_eq!(descriptor.package.name, "pyzigtest");
        assert!(descriptor.package.build_zig);
        assert_eq!(descriptor.extensions.len(), 1);
        assert_eq!(
            descriptor.extensions[0].extra_compile_args,
            vec!["-DOptimize=Debug".to_string()]
        );
        assert!(root.join("pyzigtest.zig").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_fake_zig_reports_version() {
        let tmp = TempDir::new().unwrap();
        let zig = write_fake_zig(tmp.path(), "0.12.1");
        let out = std::process::Command::new(&zig).arg("version").output().unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "0.12.1");
    }
}
