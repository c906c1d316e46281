//! The curated side of resolution: a snapshot of the nixpkgs Python package set.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use pep440_rs::Version;
use pep508_rs::Requirement;
use serde::Deserialize;

use crate::name::PackageName;
use crate::nix::NixEvaluator;
use crate::package::Package;
use crate::specifier::SpecifierSet;
use crate::{Error, Result};

/// Nix expression evaluating the package set to its JSON snapshot.
const PYTHON_PACKAGES_EXPR: &str = include_str!("data/python_packages.nix");

/// One catalog entry: a derivation attribute and the version it is pinned to.
#[derive(Debug, Clone, Deserialize)]
pub struct NixpkgsEntry {
	pub attr: String,
	pub version: String,
}

/// In-memory index of the nixpkgs Python package set.
///
/// Keys are canonicalized on construction and colliding keys have their entry
/// lists merged, so one logical package may carry several attribute/version
/// pairs at once (`django` and `django_2_2` both provide `django`).
pub struct NixpkgsData {
	data: HashMap<PackageName, Vec<(String, Version)>>,
	evaluator: Arc<NixEvaluator>,
}

impl NixpkgsData {
	pub fn new(raw: HashMap<String, Vec<NixpkgsEntry>>, evaluator: Arc<NixEvaluator>) -> Self {
		let mut data: HashMap<PackageName, Vec<(String, Version)>> = HashMap::new();
		for (raw_name, entries) in raw {
			let merged = data.entry(PackageName::new(&raw_name)).or_default();
			for entry in entries {
				match Version::from_str(&entry.version) {
					Ok(version) => merged.push((entry.attr, version)),
					Err(_) => log::warn!("skipping nixpkgs attribute {} with unparseable version {}", entry.attr, entry.version),
				}
			}
		}
		NixpkgsData { data, evaluator }
	}

	/// Evaluates the catalog snapshot against the configured nixpkgs.
	pub async fn load(evaluator: Arc<NixEvaluator>) -> Result<Self> {
		let value = evaluator.instantiate(PYTHON_PACKAGES_EXPR).await?;
		let raw: HashMap<String, Vec<NixpkgsEntry>> = serde_json::from_value(value)?;
		Ok(Self::new(raw, evaluator))
	}

	/// Every catalog package under this name, any version.
	///
	/// `NotFound` when the canonical name is absent from the catalog.
	pub fn from_pypi_name(&self, name: &str) -> Result<Vec<Package>> {
		let canonical = PackageName::new(name);
		let entries = self
			.data
			.get(&canonical)
			.ok_or_else(|| Error::NotFound(format!("{} is not defined in nixpkgs", name)))?;
		Ok(entries
			.iter()
			.map(|(attr, version)| Package::nixpkgs(canonical.clone(), version.clone(), attr.clone(), self.evaluator.clone()))
			.collect())
	}

	/// Catalog packages whose pinned version satisfies `req`. An empty result
	/// is not an error: the name exists, nothing matches.
	pub fn from_requirement(&self, req: &Requirement) -> Result<Vec<Package>> {
		let specifiers = SpecifierSet::from_requirement(req);
		let mut packages = self.from_pypi_name(&req.name)?;
		packages.retain(|p| specifiers.matches_release(&p.version()));
		Ok(packages)
	}

	/// Whether the canonical name exists in the catalog at all.
	pub fn knows(&self, name: &str) -> bool {
		self.data.contains_key(&PackageName::new(name))
	}
}
