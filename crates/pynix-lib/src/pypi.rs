//! The public side of resolution: PyPI release listings and archive fetching.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pep440_rs::Version;
use pep508_rs::Requirement;
use serde::Deserialize;

use crate::name::PackageName;
use crate::nix::NixEvaluator;
use crate::package::Package;
use crate::specifier::{self, SpecifierSet};
use crate::{Error, Result};

const SDIST: &str = "sdist";
const WHEEL: &str = "bdist_wheel";

/// One project's release listing as served by the index's JSON API. Fields the
/// resolver does not consume are ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectReleases {
	pub releases: HashMap<String, Vec<Distribution>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Distribution {
	pub packagetype: String,
	pub url: String,
	pub digests: Digests,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Digests {
	pub sha256: String,
}

/// Transport underneath the index abstraction: the release listing endpoint
/// and the archive download. Faked in tests.
#[async_trait]
pub trait PypiClient: Send + Sync {
	/// `NotFound` when the index has no record of the name at all.
	async fn fetch(&self, name: &PackageName) -> Result<ProjectReleases>;

	/// Downloads `url` and returns the local path. Integrity of the result is
	/// the caller's concern, not this method's.
	async fn fetch_url(&self, url: &str, sha256: &str) -> Result<PathBuf>;
}

/// reqwest-backed client with an on-disk download cache.
pub struct PyPICache {
	client: reqwest::Client,
	index_url: String,
	download_dir: PathBuf,
}

impl PyPICache {
	pub fn new(index_url: String, download_dir: PathBuf) -> Self {
		PyPICache {
			client: reqwest::Client::new(),
			index_url,
			download_dir,
		}
	}
}

#[async_trait]
impl PypiClient for PyPICache {
	async fn fetch(&self, name: &PackageName) -> Result<ProjectReleases> {
		let url = format!("{}/{}/json", self.index_url.trim_end_matches('/'), name);
		let response = self.client.get(&url).send().await?;
		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(Error::NotFound(format!("{} is not on PyPI", name)));
		}
		Ok(response.error_for_status()?.json().await?)
	}

	async fn fetch_url(&self, url: &str, _sha256: &str) -> Result<PathBuf> {
		let filename = url.rsplit('/').next().unwrap_or(url);
		let download_path = self.download_dir.join(filename);
		if download_path.exists() {
			log::info!("{} already downloaded, skipping", filename);
			return Ok(download_path);
		}

		tokio::fs::create_dir_all(&self.download_dir).await?;
		let mut download_file = tokio::fs::File::create(&download_path).await?;

		log::info!("downloading {}", url);
		let content = self
			.client
			.get(url)
			.send()
			.await?
			.error_for_status()?
			.bytes()
			.await?
			.to_vec();
		tokio::io::copy(&mut content.as_slice(), &mut download_file).await?;

		Ok(download_path)
	}
}

/// Queries the index for candidate packages satisfying a requirement.
pub struct PyPIData {
	client: Arc<dyn PypiClient>,
	evaluator: Arc<NixEvaluator>,
}

impl PyPIData {
	pub fn new(client: Arc<dyn PypiClient>, evaluator: Arc<NixEvaluator>) -> Self {
		PyPIData { client, evaluator }
	}

	pub(crate) fn client(&self) -> Arc<dyn PypiClient> {
		self.client.clone()
	}

	pub(crate) fn evaluator(&self) -> Arc<NixEvaluator> {
		self.evaluator.clone()
	}

	/// Every release that publishes a source distribution and satisfies `req`.
	///
	/// An empty result is not an error, but emits diagnostics for the two
	/// situations that are easy to misread as a missing package: only
	/// pre-release versions match, or matching versions publish only wheels.
	pub async fn from_requirement(&self, req: &Requirement) -> Result<Vec<Package>> {
		let name = PackageName::new(&req.name);
		let listing = self.client.fetch(&name).await?;
		let specifiers = SpecifierSet::from_requirement(req);

		let mut matching = Vec::new();
		for (raw_version, dists) in &listing.releases {
			let version = match Version::from_str(raw_version) {
				Ok(v) => v,
				Err(_) => {
					log::debug!("ignoring unparseable version {} of {}", raw_version, name);
					continue;
				}
			};
			let sdist = match dists.iter().find(|d| d.packagetype == SDIST) {
				Some(d) => d,
				None => continue,
			};
			if !specifiers.matches_release(&version) {
				continue;
			}
			matching.push(Package::pypi(
				name.clone(),
				version,
				sdist.url.clone(),
				sdist.digests.sha256.clone(),
				self.client.clone(),
				self.evaluator.clone(),
			));
		}

		if matching.is_empty() {
			hint_versions(req, &listing);
		}
		Ok(matching)
	}
}

/// Side-channel diagnostics, never control flow.
fn hint_versions(req: &Requirement, listing: &ProjectReleases) {
	let specifiers = SpecifierSet::from_requirement(req);

	let mut pre_releases = Vec::new();
	for raw_version in listing.releases.keys() {
		if let Ok(version) = Version::from_str(raw_version) {
			if specifier::is_prerelease(&version) && specifiers.contains(&version) && !specifiers.permits_prereleases() {
				pre_releases.push(format!("{}=={}", req.name, raw_version));
			}
		}
	}
	if !pre_releases.is_empty() {
		pre_releases.sort();
		log::warn!(
			"{} has pre-release versions matching the requirement; pre-releases are ignored because they can be unstable",
			req.name
		);
		log::warn!(
			"hint: pin one of the following to force a pre-release: {}",
			pre_releases.join(", ")
		);
	}

	for (raw_version, dists) in &listing.releases {
		let version = match Version::from_str(raw_version) {
			Ok(v) => v,
			Err(_) => continue,
		};
		if !specifiers.matches_release(&version) {
			continue;
		}
		if !dists.is_empty() && dists.iter().all(|d| d.packagetype == WHEEL) {
			log::warn!(
				"{}=={} only provides wheel distributions (.whl); source distributions are required, so this version is ignored",
				req.name,
				raw_version
			);
		}
	}
}
