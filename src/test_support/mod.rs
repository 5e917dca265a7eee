//! Test utilities for zigext unit tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use zigext::test_support::{PackageFixture, StubCompiler};
//!
//! #[test]
//! fn test_example() {
//!     let tmp = tempfile::TempDir::new().unwrap();
//!     let root = PackageFixture::pyzigtest().write(tmp.path());
//!     let compiler = std::sync::Arc::new(StubCompiler::new());
//!     // Build with a context using `compiler`...
//! }
//! ```

pub mod fixtures;

// Re-export fixtures for convenience
pub use fixtures::*;
