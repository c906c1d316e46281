//! Extraction of a package's own requirements from its source tree.
//!
//! A source tree is evaluated with Nix: the embedded `parse_setuppy_data.nix`
//! derivation runs the tree's `setup.py` under an interposed setuptools and
//! writes the declared requirements as three line-oriented files, plus a
//! `meta.json`. A `failed` marker in the output means extraction itself failed;
//! that degrades to "no requirements" rather than aborting a whole resolution.

use std::path::Path;
use std::str::FromStr;

use pep508_rs::{MarkerEnvironment, Requirement, StringVersion};

use crate::nix::NixEvaluator;
use crate::Result;

const PARSE_SETUPPY_EXPR: &str = include_str!("data/parse_setuppy_data.nix");

/// A package's requirements, categorized the way `setup.py` declares them.
#[derive(Debug, Clone, Default)]
pub struct PackageRequirements {
	pub build_requirements: Vec<Requirement>,
	pub test_requirements: Vec<Requirement>,
	pub runtime_requirements: Vec<Requirement>,
}

impl PackageRequirements {
	/// Parses the three requirement files out of an extraction result tree.
	pub fn from_result_path(result_path: &Path) -> Result<Self> {
		Ok(PackageRequirements {
			build_requirements: parse_requirement_lines(&std::fs::read_to_string(result_path.join("setup_requires.txt"))?),
			test_requirements: parse_requirement_lines(&std::fs::read_to_string(result_path.join("tests_requires.txt"))?),
			runtime_requirements: parse_requirement_lines(&std::fs::read_to_string(result_path.join("install_requires.txt"))?),
		})
	}
}

fn parse_requirement_lines(text: &str) -> Vec<Requirement> {
	let mut requirements = Vec::new();
	for line in text.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		match Requirement::from_str(line) {
			Ok(r) => requirements.push(r),
			Err(e) => log::warn!("skipping unparseable requirement {:?}: {}", line, e),
		}
	}
	requirements
}

/// Arguments realizing the extraction derivation against one source tree.
pub(crate) fn parse_setuppy_args(file: &Path) -> Vec<String> {
	vec![
		"-E".to_string(),
		PARSE_SETUPPY_EXPR.to_string(),
		"--no-out-link".to_string(),
		"--no-build-output".to_string(),
		"--arg".to_string(),
		"file".to_string(),
		file.display().to_string(),
	]
}

/// Extracts the categorized requirements of the source tree at `path`.
///
/// Two special cases are not errors: wheels have no source tree to evaluate,
/// and extraction failures flagged by the derivation itself degrade to empty
/// requirement lists with a warning.
pub async fn eval_path_requirements(evaluator: &NixEvaluator, path: &Path) -> Result<PackageRequirements> {
	if path.extension().map_or(false, |e| e == "whl") {
		log::info!(
			"{} is a wheel instead of a source distribution, assuming it has no requirements",
			path.display()
		);
		return Ok(PackageRequirements::default());
	}

	let result_path = evaluator.build(&parse_setuppy_args(path)).await?;
	if result_path.join("failed").exists() {
		log::warn!("failed to parse requirements of {}, assuming it has none", path.display());
		return Ok(PackageRequirements::default());
	}
	PackageRequirements::from_result_path(&result_path)
}

/// The environment requirement markers are evaluated against: CPython 3.10 on
/// the host platform.
pub fn default_marker_environment() -> MarkerEnvironment {
	let os_name = if cfg!(target_os = "windows") { "nt" } else { "posix" };
	let (sys_platform, platform_system) = if cfg!(target_os = "windows") {
		("win32", "Windows")
	} else if cfg!(target_os = "macos") {
		("darwin", "Darwin")
	} else {
		("linux", "Linux")
	};

	MarkerEnvironment {
		implementation_name: "cpython".to_string(),
		implementation_version: StringVersion::from_str("3.10.0").expect("static version is valid"),
		os_name: os_name.to_string(),
		platform_machine: std::env::consts::ARCH.to_string(),
		platform_python_implementation: "CPython".to_string(),
		platform_release: String::new(),
		platform_system: platform_system.to_string(),
		platform_version: String::new(),
		python_full_version: StringVersion::from_str("3.10.0").expect("static version is valid"),
		python_version: StringVersion::from_str("3.10").expect("static version is valid"),
		sys_platform: sys_platform.to_string(),
	}
}
