//! PEP 503 name normalization.
//!
//! Package names on PyPI and in nixpkgs are spelled inconsistently: case varies
//! and `-`, `_` and `.` are interchangeable. Every lookup and storage boundary
//! in this crate goes through [`PackageName`] so that all spellings of one
//! logical package collide into a single identity.

use once_cell::sync::Lazy;
use regex::Regex;

static NAME_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").expect("separator regex is valid"));

/// A package name in canonical form: lowercase, with every run of `-`, `_` and
/// `.` collapsed to a single `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageName(String);

impl PackageName {
	pub fn new(name: &str) -> Self {
		let mut canonical = NAME_SEPARATORS.replace_all(name, "-").into_owned();
		canonical.make_ascii_lowercase();
		PackageName(canonical)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for PackageName {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

impl std::fmt::Display for PackageName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}
