//! Core data model: package descriptors and build targets.

pub mod descriptor;
pub mod target;

pub use descriptor::{ExtensionDecl, PackageDescriptor, PackageMeta, PythonRequirement};
pub use target::{BuildTarget, OptimizeMode};
