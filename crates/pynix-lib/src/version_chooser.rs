//! Choosing exactly one version per package.
//!
//! [`VersionChooser`] owns the session state of a resolution: every canonical
//! name maps to at most one chosen package plus the intersection of every
//! version constraint seen for it. `require` resolves one requirement,
//! extracts the chosen package's own requirements, and resolves those
//! recursively and concurrently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use pep508_rs::{MarkerEnvironment, Requirement};

use crate::name::PackageName;
use crate::nix::NixEvaluator;
use crate::nixpkgs::NixpkgsData;
use crate::package::{Package, Provenance};
use crate::pypi::PyPIData;
use crate::requirements::{self, PackageRequirements};
use crate::specifier::SpecifierSet;
use crate::{Error, Result};

/// Produces a package's categorized requirements, usually by materializing its
/// source tree and evaluating it. Injected so tests (and alternative
/// front-ends) can substitute their own.
pub type RequirementEvaluator =
	Arc<dyn Fn(Arc<Package>) -> BoxFuture<'static, Result<PackageRequirements>> + Send + Sync>;

/// Per-package opt-in for resolving test requirements.
pub type TestPolicy = Arc<dyn Fn(&PackageName) -> bool + Send + Sync>;

/// A chosen package together with the intersection of every specifier that has
/// been applied to its name so far.
struct ResolutionEntry {
	package: Arc<Package>,
	specifiers: SpecifierSet,
}

pub struct VersionChooser {
	nixpkgs: NixpkgsData,
	pypi: PyPIData,
	evaluate_requirements: RequirementEvaluator,
	should_load_tests: TestPolicy,
	markers: MarkerEnvironment,
	chosen: Mutex<HashMap<PackageName, ResolutionEntry>>,
	local_packages: Mutex<HashMap<PackageName, Arc<Package>>>,
	/* Per-name locks: check-choose-record is atomic for one name while
	 * unrelated names resolve in parallel. */
	name_locks: Mutex<HashMap<PackageName, Arc<tokio::sync::Mutex<()>>>>,
}

impl VersionChooser {
	pub fn new(
		nixpkgs: NixpkgsData,
		pypi: PyPIData,
		evaluate_requirements: RequirementEvaluator,
		should_load_tests: TestPolicy,
	) -> Self {
		VersionChooser {
			nixpkgs,
			pypi,
			evaluate_requirements,
			should_load_tests,
			markers: requirements::default_marker_environment(),
			chosen: Default::default(),
			local_packages: Default::default(),
			name_locks: Default::default(),
		}
	}

	/// Resolves `r` and, recursively, the requirements of whatever package is
	/// chosen for it.
	///
	/// Requiring an already-chosen name narrows its constraints and verifies
	/// the choice still fits, without resolving it again; cyclic requirement
	/// graphs terminate there. Concurrent calls for different names proceed in
	/// parallel.
	pub async fn require(&self, r: Requirement, coming_from: Option<Arc<Package>>) -> Result<()> {
		self.require_inner(r, coming_from).await
	}

	fn require_inner(&self, r: Requirement, coming_from: Option<Arc<Package>>) -> BoxFuture<'_, Result<()>> {
		async move {
			if let Some(marker) = &r.marker {
				if !marker.evaluate(&self.markers, &[]) {
					log::debug!("skipping {}: environment marker does not apply", r);
					return Ok(());
				}
			}

			/* Nixpkgs patches some packages to drop upstream requirements. When a
			 * nixpkgs package asks for a version its own catalog cannot satisfy,
			 * trust the catalog and skip the requirement instead of failing. */
			if let Some(parent) = &coming_from {
				if parent.tolerates_relaxed_requirements()
					&& self.nixpkgs.knows(&r.name)
					&& self.nixpkgs.from_requirement(&r)?.is_empty()
				{
					log::warn!("ignoring requirement {} from {}: no matching version in nixpkgs", r, parent);
					return Ok(());
				}
			}

			match &coming_from {
				Some(parent) => log::info!("resolving {} (from {})", r, parent),
				None => log::info!("resolving {}", r),
			}

			let name = PackageName::new(&r.name);
			let name_lock = self.name_lock(&name);
			let guard = name_lock.lock().await;

			{
				let mut chosen = self.chosen.lock().expect("chosen map poisoned");
				if let Some(entry) = chosen.get_mut(&name) {
					entry.specifiers.intersect(&SpecifierSet::from_requirement(&r));
					if !entry.specifiers.contains(&entry.package.version()) {
						let origin = coming_from.as_ref().map(|p| format!(" (from {})", p)).unwrap_or_default();
						return Err(Error::NoMatchingVersion(format!(
							"new requirement {}{} does not match already chosen {}=={}",
							r,
							origin,
							name,
							entry.package.version(),
						)));
					}
					return Ok(());
				}
			}

			let package = self.choose_package(&r, &name).await?;
			{
				let mut chosen = self.chosen.lock().expect("chosen map poisoned");
				chosen.insert(
					name.clone(),
					ResolutionEntry {
						package: package.clone(),
						specifiers: SpecifierSet::from_requirement(&r),
					},
				);
			}
			drop(guard);

			let mut reqs = (self.evaluate_requirements)(package.clone()).await?;

			if package.suppresses_test_requirements() || !(self.should_load_tests)(&name) {
				reqs.test_requirements.clear();
			}

			let pending: Vec<Requirement> = reqs
				.runtime_requirements
				.into_iter()
				.chain(reqs.test_requirements)
				.chain(reqs.build_requirements)
				.collect();
			let branches: Vec<_> = pending
				.into_iter()
				.map(|req| self.require_inner(req, Some(package.clone())))
				.collect();
			join_all(branches).await.into_iter().collect::<Result<()>>()
		}
		.boxed()
	}

	/// First resolution for a name. Local overrides shadow both sources, the
	/// catalog shadows PyPI even when PyPI has newer matching versions, and the
	/// highest candidate version wins.
	async fn choose_package(&self, r: &Requirement, name: &PackageName) -> Result<Arc<Package>> {
		if let Some(local) = self.local_packages.lock().expect("local overrides poisoned").get(name).cloned() {
			return Ok(local);
		}

		let mut found_nixpkgs = true;
		let mut candidates = match self.nixpkgs.from_requirement(r) {
			Ok(packages) => packages,
			Err(Error::NotFound(_)) => {
				found_nixpkgs = false;
				Vec::new()
			}
			Err(e) => return Err(e),
		};

		let mut found_pypi = true;
		if candidates.is_empty() {
			match self.pypi.from_requirement(r).await {
				Ok(packages) => candidates = packages,
				Err(Error::NotFound(_)) => found_pypi = false,
				Err(e) => return Err(e),
			}
		}

		if !found_nixpkgs && !found_pypi {
			return Err(Error::NotFound(format!("{} not found in nixpkgs nor PyPI", r.name)));
		}
		if candidates.is_empty() {
			return Err(Error::NoMatchingVersion(r.to_string()));
		}

		let package = candidates
			.into_iter()
			.max_by(|a, b| a.version().cmp(&b.version()))
			.expect("candidates is not empty");
		Ok(Arc::new(package))
	}

	fn name_lock(&self, name: &PackageName) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.name_locks.lock().expect("name locks poisoned");
		locks.entry(name.clone()).or_default().clone()
	}

	/// Registers a local source tree as the package for `name`, then resolves
	/// it like any other package so its own requirements get pulled in. The
	/// version starts as a placeholder and is refined when the tree's metadata
	/// is read.
	pub async fn require_local(&self, name: &str, src: PathBuf) -> Result<()> {
		let canonical = PackageName::new(name);
		{
			let chosen = self.chosen.lock().expect("chosen map poisoned");
			let local = self.local_packages.lock().expect("local overrides poisoned");
			if chosen.contains_key(&canonical) || local.contains_key(&canonical) {
				return Err(Error::AlreadyExists);
			}
		}

		let package = Arc::new(Package::local(
			canonical.clone(),
			src,
			self.pypi.client(),
			self.pypi.evaluator(),
		));
		self.local_packages.lock().expect("local overrides poisoned").insert(canonical, package);

		let r = Requirement::from_str(name).map_err(|e| Error::Parse(e.to_string()))?;
		self.require(r, None).await
	}

	/// The package chosen for `name`, if any. Never fails.
	pub fn package_for(&self, name: &str) -> Option<Arc<Package>> {
		let chosen = self.chosen.lock().expect("chosen map poisoned");
		chosen.get(&PackageName::new(name)).map(|entry| entry.package.clone())
	}

	/// Every chosen package that came from PyPI. These are the packages the
	/// expression generator has to write derivations for; nixpkgs packages
	/// already exist in the target distribution.
	pub fn all_pypi_packages(&self) -> Vec<Arc<Package>> {
		let chosen = self.chosen.lock().expect("chosen map poisoned");
		chosen
			.values()
			.filter(|entry| entry.package.provenance() == Provenance::Pypi)
			.map(|entry| entry.package.clone())
			.collect()
	}

	/// Every chosen package, regardless of provenance.
	pub fn all_packages(&self) -> Vec<Arc<Package>> {
		let chosen = self.chosen.lock().expect("chosen map poisoned");
		chosen.values().map(|entry| entry.package.clone()).collect()
	}
}

/// The production requirement evaluator: materialize the package's source tree
/// and evaluate it with Nix.
pub fn evaluate_package_requirements(evaluator: Arc<NixEvaluator>) -> RequirementEvaluator {
	Arc::new(move |package: Arc<Package>| {
		let evaluator = evaluator.clone();
		async move {
			let source = package.source(&[]).await?;
			requirements::eval_path_requirements(&evaluator, &source).await
		}
		.boxed()
	})
}

/// One package's extracted requirement lists mapped onto the packages the
/// chooser actually chose for them: the surface the expression generator
/// consumes to populate a derivation's input lists.
pub struct ChosenPackageRequirements {
	pub build_requirements: Vec<Arc<Package>>,
	pub test_requirements: Vec<Arc<Package>>,
	pub runtime_requirements: Vec<Arc<Package>>,
}

impl ChosenPackageRequirements {
	pub fn from_package_requirements(
		reqs: &PackageRequirements,
		chooser: &VersionChooser,
		load_tests: bool,
	) -> Result<Self> {
		Ok(ChosenPackageRequirements {
			build_requirements: lookup_chosen(&reqs.build_requirements, chooser)?,
			test_requirements: if load_tests {
				lookup_chosen(&reqs.test_requirements, chooser)?
			} else {
				Vec::new()
			},
			runtime_requirements: lookup_chosen(&reqs.runtime_requirements, chooser)?,
		})
	}
}

fn lookup_chosen(reqs: &[Requirement], chooser: &VersionChooser) -> Result<Vec<Arc<Package>>> {
	let mut packages = Vec::new();
	for r in reqs {
		if let Some(marker) = &r.marker {
			if !marker.evaluate(&chooser.markers, &[]) {
				continue;
			}
		}
		match chooser.package_for(&r.name) {
			Some(package) => packages.push(package),
			None => return Err(Error::NotFound(format!("{} is not in the version chooser", r.name))),
		}
	}
	Ok(packages)
}
