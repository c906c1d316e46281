//! Version constraint sets accumulated during resolution.

use pep440_rs::{Version, VersionSpecifier};
use pep508_rs::{Requirement, VersionOrUrl};

/// The intersection of every version specifier seen so far for one package.
///
/// Requirements for the same package arrive from many parents; each one narrows
/// the set further. Intersection only ever appends specifiers, so the set is
/// refined and never widened.
#[derive(Debug, Clone, Default)]
pub struct SpecifierSet {
	specifiers: Vec<VersionSpecifier>,
}

impl SpecifierSet {
	/// The specifiers of `req`. URL requirements and requirements without a
	/// version clause produce the empty set, which matches every version.
	pub fn from_requirement(req: &Requirement) -> Self {
		match &req.version_or_url {
			Some(VersionOrUrl::VersionSpecifier(specs)) => SpecifierSet {
				specifiers: specs.iter().cloned().collect(),
			},
			_ => SpecifierSet::default(),
		}
	}

	pub fn intersect(&mut self, other: &SpecifierSet) {
		self.specifiers.extend(other.specifiers.iter().cloned());
	}

	/// Plain PEP 440 containment. All specifiers must hold.
	pub fn contains(&self, version: &Version) -> bool {
		self.specifiers.iter().all(|s| s.contains(version))
	}

	/// Pre-releases are only eligible when a specifier itself mentions one.
	pub fn permits_prereleases(&self) -> bool {
		self.specifiers.iter().any(|s| is_prerelease(s.version()))
	}

	/// Containment as applied to release candidates: final releases follow
	/// [`SpecifierSet::contains`], pre-releases additionally require
	/// [`SpecifierSet::permits_prereleases`].
	pub fn matches_release(&self, version: &Version) -> bool {
		self.contains(version) && (!is_prerelease(version) || self.permits_prereleases())
	}

	pub fn is_empty(&self) -> bool {
		self.specifiers.is_empty()
	}
}

/// Whether a version is a pre-release or developmental release.
pub fn is_prerelease(version: &Version) -> bool {
	version.pre.is_some() || version.dev.is_some()
}

impl std::fmt::Display for SpecifierSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let joined = self.specifiers.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
		write!(f, "{}", joined)
	}
}
