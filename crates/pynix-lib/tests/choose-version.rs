//! Resolution behavior of the version chooser against faked sources.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use pep508_rs::Requirement;

use pynix::nix::NixEvaluator;
use pynix::nixpkgs::NixpkgsData;
use pynix::package::Provenance;
use pynix::pypi::PyPIData;
use pynix::requirements::PackageRequirements;
use pynix::version_chooser::{RequirementEvaluator, TestPolicy, VersionChooser};
use pynix::Error;
use pynix_test_utils::*;

fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

fn requirement(r: &str) -> Requirement {
	Requirement::from_str(r).expect("test requirement is valid")
}

fn no_requirements() -> RequirementEvaluator {
	dummy_package_requirements(vec![])
}

fn no_tests() -> TestPolicy {
	Arc::new(|_| false)
}

fn all_tests() -> TestPolicy {
	Arc::new(|_| true)
}

fn chooser(
	nixpkgs: NixpkgsData,
	client: DummyPypiClient,
	evaluator: Arc<NixEvaluator>,
	evaluate: RequirementEvaluator,
	tests: TestPolicy,
) -> VersionChooser {
	VersionChooser::new(nixpkgs, PyPIData::new(Arc::new(client), evaluator), evaluate, tests)
}

fn zstd_nixpkgs(evaluator: Arc<NixEvaluator>) -> NixpkgsData {
	nixpkgs_data(vec![("zstd", vec![catalog_entry("zstd", "1.4.4.0")])], evaluator)
}

fn assert_version(c: &VersionChooser, name: &str, version: &str) {
	let package = c.package_for(name).unwrap_or_else(|| panic!("{} was not chosen", name));
	assert_eq!(package.version().to_string(), version);
}

#[tokio::test]
async fn nixpkgs_package_resolves() {
	let e = inert_evaluator();
	let c = chooser(zstd_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("zstd==1.4.4.0"), None).await.unwrap();
	assert_version(&c, "zstd", "1.4.4.0");
}

#[tokio::test]
async fn package_for_canonicalizes() {
	let e = inert_evaluator();
	let c = chooser(zstd_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("ZSTD==1.4.4.0"), None).await.unwrap();
	let a = c.package_for("zstd").unwrap();
	let b = c.package_for("ZSTD").unwrap();
	assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn unknown_package_is_not_found() {
	let e = inert_evaluator();
	let c = chooser(nixpkgs_data(vec![], e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	let result = c.require(requirement("zstd==1.4.4.0"), None).await;
	assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn known_name_without_candidates_is_no_matching_version() {
	let e = inert_evaluator();
	let c = chooser(zstd_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	let result = c.require(requirement("zstd>1.4.4.0"), None).await;
	assert!(matches!(result, Err(Error::NoMatchingVersion(_))));
}

#[tokio::test]
async fn conflicting_requirement_after_choice_fails() {
	let e = inert_evaluator();
	let c = chooser(zstd_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("zstd==1.4.4.0"), None).await.unwrap();
	let result = c.require(requirement("zstd<1.4.4.0"), None).await;
	assert!(matches!(result, Err(Error::NoMatchingVersion(_))));
	/* the original choice survives the failed narrowing */
	assert_version(&c, "zstd", "1.4.4.0");
}

#[tokio::test]
async fn conflict_respects_accumulated_specifiers() {
	let e = inert_evaluator();
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("django==2.1.14"), None).await.unwrap();
	let result = c.require(requirement("django>=2.2"), None).await;
	assert!(matches!(result, Err(Error::NoMatchingVersion(_))));
}

#[tokio::test]
async fn highest_matching_version_wins() {
	let e = inert_evaluator();
	let multiversion = nixpkgs_data(
		vec![(
			"a",
			vec![
				catalog_entry("a1", "1.0.1"),
				catalog_entry("a24", "2.4"),
				catalog_entry("a3", "3.0.0"),
				catalog_entry("a2", "2.3"),
			],
		)],
		e.clone(),
	);
	let c = chooser(multiversion, DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("a>=2.0.0"), None).await.unwrap();
	assert_version(&c, "a", "3.0.0");
}

#[tokio::test]
async fn runtime_requirements_resolve() {
	let e = inert_evaluator();
	let evaluate = dummy_package_requirements(vec![(
		"django_2_2",
		package_requirements(&[], &[], &["pytz"]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require(requirement("django>=2.2"), None).await.unwrap();
	assert!(c.package_for("django").is_some());
	assert_version(&c, "pytz", "2019.3");
}

#[tokio::test]
async fn build_requirements_resolve() {
	let e = inert_evaluator();
	let evaluate = dummy_package_requirements(vec![(
		"pytz",
		package_requirements(&["setuptools_scm"], &[], &[]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require(requirement("pytz"), None).await.unwrap();
	assert!(c.package_for("pytz").is_some());
	assert!(c.package_for("setuptools-scm").is_some());
}

#[tokio::test]
async fn transitive_closure_is_chosen() {
	let e = inert_evaluator();
	let evaluate = dummy_package_requirements(vec![
		("flask", package_requirements(&[], &[], &["itsdangerous"])),
		("itsdangerous", package_requirements(&[], &[], &["Werkzeug"])),
	]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require(requirement("flask"), None).await.unwrap();
	assert!(c.package_for("flask").is_some());
	assert!(c.package_for("itsdangerous").is_some());
	assert!(c.package_for("Werkzeug").is_some());
}

#[tokio::test]
async fn cyclic_requirements_terminate() {
	init_logging();
	let e = inert_evaluator();
	let evaluate = dummy_package_requirements(vec![
		("flask", package_requirements(&[], &[], &["itsdangerous"])),
		("itsdangerous", package_requirements(&[], &[], &["flask"])),
	]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require(requirement("flask"), None).await.unwrap();
	assert!(c.package_for("flask").is_some());
	assert!(c.package_for("itsdangerous").is_some());
}

#[tokio::test]
async fn pypi_package_resolves_ignoring_wheel_only_releases() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let c = chooser(sample_nixpkgs(e.clone()), client, e, no_requirements(), no_tests());
	c.require(requirement("sampleproject"), None).await.unwrap();
	/* 2.0.0 only publishes a wheel, so 1.3.1 is the highest usable release */
	assert_version(&c, "sampleproject", "1.3.1");
	assert_eq!(c.package_for("sampleproject").unwrap().provenance(), Provenance::Pypi);
}

#[tokio::test]
async fn nixpkgs_takes_precedence_over_newer_pypi_versions() {
	let e = inert_evaluator();
	let catalog = nixpkgs_data(vec![("sampleproject", vec![catalog_entry("sampleproject", "1.0")])], e.clone());
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let c = chooser(catalog, client, e, no_requirements(), no_tests());
	c.require(requirement("sampleproject"), None).await.unwrap();
	assert_version(&c, "sampleproject", "1.0");
	assert_eq!(c.package_for("sampleproject").unwrap().provenance(), Provenance::Nixpkgs);

	let result = c.require(requirement("sampleproject>1.0"), None).await;
	assert!(matches!(result, Err(Error::NoMatchingVersion(_))));
}

#[tokio::test]
async fn pypi_dependencies_may_come_from_nixpkgs() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let evaluate = dummy_package_requirements(vec![(
		"sampleproject",
		package_requirements(&[], &[], &["flask"]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), client, e, evaluate, no_tests());
	c.require(requirement("sampleproject"), None).await.unwrap();
	assert_eq!(c.package_for("sampleproject").unwrap().provenance(), Provenance::Pypi);
	assert_eq!(c.package_for("flask").unwrap().provenance(), Provenance::Nixpkgs);
}

#[tokio::test]
async fn conflicting_versions_from_two_parents_fail() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let evaluate = dummy_package_requirements(vec![
		("flask", package_requirements(&[], &[], &["sampleproject==1.0"])),
		("click", package_requirements(&[], &[], &["sampleproject>1.0"])),
	]);
	let c = chooser(sample_nixpkgs(e.clone()), client, e, evaluate, no_tests());
	c.require(requirement("flask"), None).await.unwrap();
	assert_version(&c, "sampleproject", "1.0");
	let result = c.require(requirement("click"), None).await;
	assert!(matches!(result, Err(Error::NoMatchingVersion(_))));
}

#[tokio::test]
async fn false_marker_skips_requirement() {
	let e = inert_evaluator();
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("flask; python_version<'3'"), None).await.unwrap();
	assert!(c.package_for("flask").is_none());
}

#[tokio::test]
async fn nixpkgs_packages_suppress_test_requirements() {
	let e = inert_evaluator();
	let evaluate = dummy_package_requirements(vec![(
		"flask",
		package_requirements(&[], &["pytest"], &[]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, all_tests());
	c.require(requirement("flask"), None).await.unwrap();
	assert!(c.package_for("pytest").is_none());
}

#[tokio::test]
async fn pypi_test_requirements_load_when_opted_in() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let evaluate = dummy_package_requirements(vec![(
		"sampleproject",
		package_requirements(&[], &["pytest"], &[]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), client, e, evaluate, all_tests());
	c.require(requirement("sampleproject"), None).await.unwrap();
	assert_version(&c, "pytest", "5.3.1");
}

#[tokio::test]
async fn pypi_test_requirements_skipped_without_opt_in() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let evaluate = dummy_package_requirements(vec![(
		"sampleproject",
		package_requirements(&[], &["pytest"], &[]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), client, e, evaluate, no_tests());
	c.require(requirement("sampleproject"), None).await.unwrap();
	assert!(c.package_for("pytest").is_none());
}

#[tokio::test]
async fn requiring_twice_does_not_reextract() {
	let e = inert_evaluator();
	let extractions = Arc::new(AtomicUsize::new(0));
	let evaluate: RequirementEvaluator = {
		let extractions = extractions.clone();
		Arc::new(move |_package| {
			extractions.fetch_add(1, Ordering::SeqCst);
			async move { Ok(PackageRequirements::default()) }.boxed()
		})
	};
	let c = chooser(zstd_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require(requirement("zstd==1.4.4.0"), None).await.unwrap();
	c.require(requirement("zstd==1.4.4.0"), None).await.unwrap();
	assert_eq!(extractions.load(Ordering::SeqCst), 1);
	assert_version(&c, "zstd", "1.4.4.0");
}

#[tokio::test]
async fn concurrent_requires_for_one_name_choose_once() {
	let e = inert_evaluator();
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	let (a, b) = tokio::join!(
		c.require(requirement("flask"), None),
		c.require(requirement("flask==1.1.1"), None),
	);
	a.unwrap();
	b.unwrap();
	assert_version(&c, "flask", "1.1.1");
	assert_eq!(c.all_packages().len(), 1);
}

#[tokio::test]
async fn nixpkgs_parent_tolerates_unsatisfiable_requirement() {
	init_logging();
	let e = inert_evaluator();
	/* nixpkgs knows pytz but not at that version; trust the catalog's patches and skip */
	let evaluate = dummy_package_requirements(vec![(
		"django_2_2",
		package_requirements(&[], &[], &["pytz>2100"]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require(requirement("django>=2.2"), None).await.unwrap();
	assert!(c.package_for("django").is_some());
	assert!(c.package_for("pytz").is_none());
}

#[tokio::test]
async fn pypi_parent_does_not_tolerate_unsatisfiable_requirement() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let evaluate = dummy_package_requirements(vec![(
		"sampleproject",
		package_requirements(&[], &[], &["pytz>2100"]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), client, e, evaluate, no_tests());
	let result = c.require(requirement("sampleproject"), None).await;
	assert!(matches!(result, Err(Error::NoMatchingVersion(_))));
}

#[tokio::test]
async fn local_package_resolves_with_placeholder_version() {
	let e = inert_evaluator();
	let dir = tempfile::tempdir().unwrap();
	let evaluate = dummy_package_requirements(vec![(
		"mypkg",
		package_requirements(&[], &[], &["flask"]),
	)]);
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, evaluate, no_tests());
	c.require_local("mypkg", dir.path().to_path_buf()).await.unwrap();

	let package = c.package_for("mypkg").unwrap();
	assert_eq!(package.version().to_string(), "0.1.dev0");
	assert_eq!(package.provenance(), Provenance::Pypi);
	assert_eq!(package.local_source(), Some(dir.path()));
	assert!(c.package_for("flask").is_some());
	assert!(c.all_pypi_packages().iter().any(|p| p.name().as_str() == "mypkg"));
}

#[tokio::test]
async fn local_package_cannot_shadow_chosen_package() {
	let e = inert_evaluator();
	let dir = tempfile::tempdir().unwrap();
	let c = chooser(sample_nixpkgs(e.clone()), DummyPypiClient::new(), e, no_requirements(), no_tests());
	c.require(requirement("flask"), None).await.unwrap();
	let result = c.require_local("flask", dir.path().to_path_buf()).await;
	assert!(matches!(result, Err(Error::AlreadyExists)));
}

#[tokio::test]
async fn all_pypi_packages_filters_by_provenance() {
	let e = inert_evaluator();
	let client = DummyPypiClient::new().with_project("sampleproject", sampleproject_releases());
	let c = chooser(sample_nixpkgs(e.clone()), client, e, no_requirements(), no_tests());
	c.require(requirement("flask"), None).await.unwrap();
	c.require(requirement("sampleproject"), None).await.unwrap();

	assert_eq!(c.all_packages().len(), 2);
	let pypi = c.all_pypi_packages();
	assert_eq!(pypi.len(), 1);
	assert_eq!(pypi[0].name().as_str(), "sampleproject");
}
