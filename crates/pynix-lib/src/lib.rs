//! # pynix
//!
//! Resolves a consistent, minimal set of Python package versions for a set of
//! requirements, drawing candidates from the nixpkgs Python package set and from
//! PyPI. Each chosen package's own requirements are discovered by evaluating its
//! source tree with Nix, then resolved recursively.

pub mod error;
pub use error::Result;
pub use error::Error;

pub mod name;
pub mod specifier;
pub mod package;
pub mod nixpkgs;
pub mod pypi;
pub mod requirements;
pub mod nix;

pub mod version_chooser;
pub use version_chooser::VersionChooser;

pub mod config;
pub use config::PynixOptions;
