//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("parsing error: {0}")]
	Parse(String),
	/// The name is unknown to both nixpkgs and PyPI.
	#[error("package not found: {0}")]
	NotFound(String),
	/// The name is known but no candidate satisfies the accumulated specifiers.
	#[error("no matching version: {0}")]
	NoMatchingVersion(String),
	/// A fetched archive does not match its recorded digest. Never retried.
	#[error("sha256 hash of {url} should be {expected} but it is {actual}")]
	Integrity {
		url: String,
		expected: String,
		actual: String,
	},
	/// Nix exited non-zero for a non-transient reason.
	#[error("nix failed with code {status}: {stderr}")]
	NixBuild { status: i32, stderr: String },
	#[error("already exists")]
	AlreadyExists,
}
