//! The unit of resolution: a chosen package and where it came from.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use pep440_rs::Version;
use serde::Deserialize;

use crate::name::PackageName;
use crate::nix::NixEvaluator;
use crate::pypi::PypiClient;
use crate::requirements;
use crate::{Error, Result};

/// Version recorded for a local source tree until its metadata is read.
pub const LOCAL_PLACEHOLDER_VERSION: &str = "0.1.dev0";

/// Nix expression materializing a nixpkgs package's source. Packages without a
/// `src` attribute get a dummy tree whose requirement extraction fails in the
/// expected, recoverable way.
const NIXPKGS_SOURCE_EXPR: &str = r#"
with import <nixpkgs> {};
let
  pkg = python3Packages."ATTR";
in
  if pkg ? "src" then
    pkg.src
  else
    writeTextFile {
      text = "raise RuntimeError('package has no source')";
      name = "ATTR_dummy_src";
      destination = "/setup.py";
    }
"#;

/// Which of the two package sources a package came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
	Nixpkgs,
	Pypi,
}

/// Best-effort metadata parsed from a package's source tree. Absent data is
/// not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
	pub description: Option<String>,
	pub url: Option<String>,
	pub license: Option<String>,
}

#[derive(Deserialize)]
struct RawMetadata {
	description: Option<String>,
	url: Option<String>,
	license: Option<String>,
	version: Option<String>,
}

/// Provenance-specific package data, together with the handles needed to
/// materialize the package's source tree.
pub enum PackageSource {
	Nixpkgs {
		attr: String,
		evaluator: Arc<NixEvaluator>,
	},
	Pypi {
		download_url: String,
		sha256: String,
		local_source: Option<PathBuf>,
		client: Arc<dyn PypiClient>,
		evaluator: Arc<NixEvaluator>,
	},
}

/// A package at a resolved version.
///
/// Shared as `Arc<Package>`: the chooser's session map and every consumer see
/// the same object. A package is never mutated after being chosen, except that
/// a local source tree's placeholder version is refined once when its metadata
/// is read.
pub struct Package {
	name: PackageName,
	version: RwLock<Version>,
	source: PackageSource,
}

impl Package {
	pub fn nixpkgs(name: PackageName, version: Version, attr: String, evaluator: Arc<NixEvaluator>) -> Self {
		Package {
			name,
			version: RwLock::new(version),
			source: PackageSource::Nixpkgs { attr, evaluator },
		}
	}

	pub fn pypi(
		name: PackageName,
		version: Version,
		download_url: String,
		sha256: String,
		client: Arc<dyn PypiClient>,
		evaluator: Arc<NixEvaluator>,
	) -> Self {
		Package {
			name,
			version: RwLock::new(version),
			source: PackageSource::Pypi {
				download_url,
				sha256,
				local_source: None,
				client,
				evaluator,
			},
		}
	}

	/// A synthetic package backed by a local source tree instead of a download.
	pub fn local(name: PackageName, source: PathBuf, client: Arc<dyn PypiClient>, evaluator: Arc<NixEvaluator>) -> Self {
		Package {
			name,
			version: RwLock::new(Version::from_str(LOCAL_PLACEHOLDER_VERSION).expect("placeholder version is valid")),
			source: PackageSource::Pypi {
				download_url: String::new(),
				sha256: String::new(),
				local_source: Some(source),
				client,
				evaluator,
			},
		}
	}

	pub fn name(&self) -> &PackageName {
		&self.name
	}

	pub fn version(&self) -> Version {
		self.version.read().expect("version lock poisoned").clone()
	}

	pub fn provenance(&self) -> Provenance {
		match self.source {
			PackageSource::Nixpkgs { .. } => Provenance::Nixpkgs,
			PackageSource::Pypi { .. } => Provenance::Pypi,
		}
	}

	/// Nixpkgs packages are assumed pre-validated; their test requirements are
	/// never expanded.
	pub fn suppresses_test_requirements(&self) -> bool {
		self.provenance() == Provenance::Nixpkgs
	}

	/// Nixpkgs patches packages to drop upstream requirements, so requirements
	/// coming from a nixpkgs package may be skipped when the catalog cannot
	/// satisfy them.
	pub fn tolerates_relaxed_requirements(&self) -> bool {
		self.provenance() == Provenance::Nixpkgs
	}

	/// The stable name output artifacts are emitted under.
	pub fn attribute_name(&self) -> &str {
		match &self.source {
			PackageSource::Nixpkgs { attr, .. } => attr,
			PackageSource::Pypi { .. } => self.name.as_str(),
		}
	}

	pub fn local_source(&self) -> Option<&Path> {
		match &self.source {
			PackageSource::Pypi { local_source, .. } => local_source.as_deref(),
			PackageSource::Nixpkgs { .. } => None,
		}
	}

	pub fn download_url(&self) -> Option<&str> {
		match &self.source {
			PackageSource::Pypi { download_url, .. } if !download_url.is_empty() => Some(download_url),
			_ => None,
		}
	}

	pub fn sha256(&self) -> Option<&str> {
		match &self.source {
			PackageSource::Pypi { sha256, .. } if !sha256.is_empty() => Some(sha256),
			_ => None,
		}
	}

	/// The archive filename of a PyPI package's source distribution.
	pub fn filename(&self) -> Option<&str> {
		self.download_url().and_then(|url| url.rsplit('/').next())
	}

	fn evaluator(&self) -> &Arc<NixEvaluator> {
		match &self.source {
			PackageSource::Nixpkgs { evaluator, .. } => evaluator,
			PackageSource::Pypi { evaluator, .. } => evaluator,
		}
	}

	/// Materializes the package's source tree and returns its local path.
	///
	/// For PyPI packages the fetched archive's sha256 is recomputed and checked
	/// against the digest recorded at lookup time. A mismatch is
	/// [`Error::Integrity`] and is never retried.
	pub async fn source(&self, extra_args: &[String]) -> Result<PathBuf> {
		match &self.source {
			PackageSource::Nixpkgs { attr, evaluator } => {
				let expr = NIXPKGS_SOURCE_EXPR.replace("ATTR", attr);
				let mut args: Vec<String> =
					["--no-out-link", "--no-build-output", "-E"].iter().map(|s| s.to_string()).collect();
				args.push(expr);
				args.extend(extra_args.iter().cloned());
				evaluator.build(&args).await
			}
			PackageSource::Pypi { download_url, sha256, local_source, client, .. } => {
				if let Some(path) = local_source {
					return Ok(path.clone());
				}
				let downloaded = client.fetch_url(download_url, sha256).await?;
				let actual = sha256_of_file(&downloaded)?;
				if actual != *sha256 {
					return Err(Error::Integrity {
						url: download_url.clone(),
						expected: sha256.clone(),
						actual,
					});
				}
				Ok(downloaded)
			}
		}
	}

	/// Best-effort metadata from the package's source tree.
	///
	/// Wheels and sources whose extraction fails are not errors; they yield
	/// empty metadata. A local source tree's placeholder version is replaced
	/// with the version found in its metadata.
	pub async fn metadata(&self) -> Result<PackageMetadata> {
		let source = self.source(&[]).await?;
		if source.extension().map_or(false, |e| e == "whl") {
			return Ok(PackageMetadata::default());
		}

		let result = self.evaluator().build(&requirements::parse_setuppy_args(&source)).await?;
		if result.join("failed").exists() {
			log::warn!("failed to parse metadata of {}, assuming it has none", source.display());
			return Ok(PackageMetadata::default());
		}

		let raw: RawMetadata = serde_json::from_str(&std::fs::read_to_string(result.join("meta.json"))?)?;
		if let Some(version) = raw.version.as_deref() {
			if self.local_source().is_some() {
				match Version::from_str(version) {
					Ok(v) => *self.version.write().expect("version lock poisoned") = v,
					Err(_) => log::warn!("{} declares unparseable version {}", self.name, version),
				}
			}
		}
		Ok(PackageMetadata {
			description: raw.description,
			url: raw.url,
			license: raw.license,
		})
	}
}

fn sha256_of_file(path: &Path) -> Result<String> {
	use sha2::{Digest, Sha256};

	let mut file = std::fs::File::open(path)?;
	let mut hasher = Sha256::new();
	std::io::copy(&mut file, &mut hasher)?;
	Ok(format!("{:x}", hasher.finalize()))
}

impl std::fmt::Display for Package {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.source {
			PackageSource::Nixpkgs { attr, .. } => write!(f, "nixpkgs.{} ({}=={})", attr, self.name, self.version()),
			PackageSource::Pypi { .. } => write!(f, "{}=={}", self.name, self.version()),
		}
	}
}

impl std::fmt::Debug for Package {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Package")
			.field("name", &self.name)
			.field("version", &self.version())
			.field("provenance", &self.provenance())
			.field("attribute_name", &self.attribute_name())
			.finish()
	}
}
