//! Build descriptor resolution.
//!
//! Turns the declared `[[extension]]` entries into validated [`BuildTarget`]s.
//! Resolution only reads the filesystem to confirm that sources exist; it
//! never writes anything.

use std::collections::HashSet;
use std::path::Path;

use crate::core::descriptor::PackageDescriptor;
use crate::core::target::{
    dedup_last_wins, extract_optimize, is_valid_module_name, BuildTarget, OptimizeMode,
};
use crate::error::DescriptorError;
use crate::util::fs::absolutize;

/// Resolve every declared extension of `descriptor`.
///
/// Relative source paths resolve against `package_root`. `optimize_override`
/// replaces each target's declared mode.
pub fn resolve(
    descriptor: &PackageDescriptor,
    package_root: &Path,
    optimize_override: Option<OptimizeMode>,
) -> Result<Vec<BuildTarget>, DescriptorError> {
    let package = &descriptor.package;

    if !package.build_zig {
        return Err(DescriptorError::BuildNotEnabled {
            package: package.name.clone(),
        });
    }
    if descriptor.extensions.is_empty() {
        return Err(DescriptorError::NoExtensions {
            package: package.name.clone(),
        });
    }
    descriptor.version()?;
    descriptor.python_requirement()?;

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(descriptor.extensions.len());

    for decl in &descriptor.extensions {
        let name = decl.name.trim();
        if !is_valid_module_name(name) {
            return Err(DescriptorError::InvalidModuleName {
                name: decl.name.clone(),
            });
        }
        if !seen.insert(name.to_string()) {
            return Err(DescriptorError::DuplicateModule {
                module: name.to_string(),
            });
        }
        if decl.sources.is_empty() {
            return Err(DescriptorError::EmptySources {
                module: name.to_string(),
            });
        }

        let mut sources = Vec::with_capacity(decl.sources.len());
        for source in &decl.sources {
            let path = absolutize(package_root, source);
            if !path.is_file() {
                return Err(DescriptorError::MissingSource {
                    module: name.to_string(),
                    path,
                });
            }
            sources.push(path);
        }

        let (declared, rest) = extract_optimize(&decl.extra_compile_args).map_err(|detail| {
            DescriptorError::InvalidCompileArgs {
                module: name.to_string(),
                detail,
            }
        })?;
        let optimize = optimize_override.or(declared).unwrap_or_default();

        tracing::trace!("resolved `{}` ({}, {} source(s))", name, optimize, sources.len());
        targets.push(BuildTarget::new(
            name.to_string(),
            sources,
            dedup_last_wins(&rest),
            optimize,
        ));
    }

    Ok(targets)
}
