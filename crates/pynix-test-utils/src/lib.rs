//! Various helpers for testing pynix
//!
//! Fakes for the two external collaborators (the PyPI index and the Nix
//! toolchain) plus canned catalog data, so resolution can be exercised without
//! network access or an installed Nix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use pep508_rs::Requirement;

use pynix::name::PackageName;
use pynix::nix::NixEvaluator;
use pynix::nixpkgs::{NixpkgsData, NixpkgsEntry};
use pynix::package::Package;
use pynix::pypi::{Digests, Distribution, ProjectReleases, PypiClient};
use pynix::requirements::PackageRequirements;
use pynix::version_chooser::RequirementEvaluator;
use pynix::{Error, Result};

/// A PyPI client serving hardcoded release listings and local files.
#[derive(Default)]
pub struct DummyPypiClient {
	data: HashMap<PackageName, ProjectReleases>,
	files: HashMap<String, PathBuf>,
}

impl DummyPypiClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_project(mut self, name: &str, releases: ProjectReleases) -> Self {
		self.data.insert(PackageName::new(name), releases);
		self
	}

	/// Serves `path` for `url` from `fetch_url`.
	pub fn with_file(mut self, url: &str, path: PathBuf) -> Self {
		self.files.insert(url.to_string(), path);
		self
	}
}

#[async_trait]
impl PypiClient for DummyPypiClient {
	async fn fetch(&self, name: &PackageName) -> Result<ProjectReleases> {
		self.data
			.get(name)
			.cloned()
			.ok_or_else(|| Error::NotFound(format!("{} is not on PyPI", name)))
	}

	async fn fetch_url(&self, url: &str, _sha256: &str) -> Result<PathBuf> {
		self.files
			.get(url)
			.cloned()
			.ok_or_else(|| Error::NotFound(format!("no file registered for {}", url)))
	}
}

pub fn sdist(url: &str, sha256: &str) -> Distribution {
	Distribution {
		packagetype: "sdist".to_string(),
		url: url.to_string(),
		digests: Digests { sha256: sha256.to_string() },
	}
}

pub fn wheel(url: &str, sha256: &str) -> Distribution {
	Distribution {
		packagetype: "bdist_wheel".to_string(),
		url: url.to_string(),
		digests: Digests { sha256: sha256.to_string() },
	}
}

pub fn releases(versions: Vec<(&str, Vec<Distribution>)>) -> ProjectReleases {
	ProjectReleases {
		releases: versions.into_iter().map(|(v, dists)| (v.to_string(), dists)).collect(),
	}
}

/// Release data in the shape of the `sampleproject` fixture: a few sdist
/// releases and one wheel-only release.
pub fn sampleproject_releases() -> ProjectReleases {
	releases(vec![
		("1.0", vec![sdist("https://files.example.org/sampleproject-1.0.tar.gz", "aa11")]),
		("1.2.0", vec![sdist("https://files.example.org/sampleproject-1.2.0.tar.gz", "bb22")]),
		("1.3.1", vec![sdist("https://files.example.org/sampleproject-1.3.1.tar.gz", "cc33")]),
		("2.0.0", vec![wheel("https://files.example.org/sampleproject-2.0.0-py3-none-any.whl", "dd44")]),
	])
}

/// An evaluator that never spawns anything. Tests that do spawn use
/// [`fake_nix_script`] and [`NixEvaluator::with_commands`] instead.
pub fn inert_evaluator() -> Arc<NixEvaluator> {
	Arc::new(NixEvaluator::new(Some(1), None))
}

pub fn catalog_entry(attr: &str, version: &str) -> NixpkgsEntry {
	NixpkgsEntry { attr: attr.to_string(), version: version.to_string() }
}

pub fn nixpkgs_data(raw: Vec<(&str, Vec<NixpkgsEntry>)>, evaluator: Arc<NixEvaluator>) -> NixpkgsData {
	NixpkgsData::new(raw.into_iter().map(|(k, v)| (k.to_string(), v)).collect(), evaluator)
}

/// A small catalog resembling the nixpkgs Python package set, with raw-name
/// spellings that exercise canonicalization and a duplicated django entry.
pub fn sample_nixpkgs(evaluator: Arc<NixEvaluator>) -> NixpkgsData {
	nixpkgs_data(
		vec![
			("Flask", vec![catalog_entry("flask", "1.1.1")]),
			("itsdangerous", vec![catalog_entry("itsdangerous", "1.1.0")]),
			("Werkzeug", vec![catalog_entry("werkzeug", "0.16.0")]),
			("Click", vec![catalog_entry("click", "7.0")]),
			("pytz", vec![catalog_entry("pytz", "2019.3")]),
			("Django", vec![catalog_entry("django", "2.1.14"), catalog_entry("django_2_2", "2.2.8")]),
			("pytest", vec![catalog_entry("pytest", "5.3.1")]),
			("setuptools_scm", vec![catalog_entry("setuptools_scm", "3.3.3")]),
		],
		evaluator,
	)
}

/// Parses a [`PackageRequirements`] out of plain requirement strings.
/// # Panics
/// On unparseable requirements; intended for hardcoded test data only.
pub fn package_requirements(build: &[&str], test: &[&str], runtime: &[&str]) -> PackageRequirements {
	fn parse(reqs: &[&str]) -> Vec<Requirement> {
		reqs.iter().map(|r| Requirement::from_str(r).expect("test requirement is valid")).collect()
	}
	PackageRequirements {
		build_requirements: parse(build),
		test_requirements: parse(test),
		runtime_requirements: parse(runtime),
	}
}

/// A requirement evaluator serving hardcoded requirement lists, keyed by the
/// package's attribute name. Unknown packages have no requirements.
pub fn dummy_package_requirements(hardcoded: Vec<(&str, PackageRequirements)>) -> RequirementEvaluator {
	let hardcoded: HashMap<String, PackageRequirements> =
		hardcoded.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
	Arc::new(move |package: Arc<Package>| {
		let reqs = hardcoded.get(package.attribute_name()).cloned().unwrap_or_default();
		async move { Ok(reqs) }.boxed()
	})
}

/// Writes an executable shell script to stand in for `nix-build` or
/// `nix-instantiate`. The script body runs under `#!/bin/sh`.
#[cfg(unix)]
pub fn fake_nix_script(dir: &Path, name: &str, body: &str) -> PathBuf {
	use std::io::Write;
	use std::os::unix::fs::PermissionsExt;

	let path = dir.join(name);
	let mut file = std::fs::File::create(&path).expect("failed to create fake nix script");
	writeln!(file, "#!/bin/sh").expect("failed to write fake nix script");
	file.write_all(body.as_bytes()).expect("failed to write fake nix script");
	drop(file);
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("failed to mark script executable");
	path
}
