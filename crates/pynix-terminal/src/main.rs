use std::str::FromStr;
use std::sync::Arc;

use pep508_rs::Requirement;
use pynix::name::PackageName;
use pynix::nix::NixEvaluator;
use pynix::nixpkgs::NixpkgsData;
use pynix::package::Provenance;
use pynix::pypi::{PyPICache, PyPIData};
use pynix::version_chooser::{evaluate_package_requirements, TestPolicy, VersionChooser};

#[tokio::main]
async fn main() {
	env_logger::init();

	/* Parse console input */
	let parsed_options = {
		let args: Vec<String> = std::env::args().collect();

		let mut opts = getopts::Options::new();
		opts.optflag("h", "help", "Show help");
		opts.optopt("l", "local", "Resolve the current directory as package NAME alongside the requirements", "NAME");
		opts.optopt("", "nixpkgs", "URL of a nixpkgs tarball to resolve against instead of <nixpkgs>", "URL");
		opts.optopt("j", "max-jobs", "Maximum number of concurrent nix processes (default: CPU count)", "N");
		opts.optmulti("r", "requirements-file", "Read requirements from a file, one per line", "FILE");
		opts.optflag("", "all-tests", "Load test requirements of every non-nixpkgs package");
		opts.optmulti("", "tests", "Load test requirements of PACKAGE", "PACKAGE");
		opts.optmulti("", "ignore-tests", "Never load test requirements of PACKAGE", "PACKAGE");

		let parsed_options = match opts.parse(&args[1..]) {
			Ok(m) => m,
			Err(e) => {
				println!("Unable to parse options: {}", e);
				return;
			}
		};

		if parsed_options.opt_present("h") {
			eprintln!("{}", opts.usage("Usage: pynix [options] REQUIREMENT..."));
			return;
		}

		parsed_options
	};

	let mut config = pynix::PynixOptions::default();
	config.set_nixpkgs_url(parsed_options.opt_str("nixpkgs"));
	match parsed_options.opt_str("max-jobs").map(|j| j.parse::<usize>()) {
		Some(Ok(jobs)) => config.set_max_jobs(Some(jobs)),
		Some(Err(_)) => {
			log::error!("--max-jobs must be a number.");
			std::process::exit(2);
		}
		None => {}
	}

	let mut requirements = Vec::<Requirement>::new();
	for file in parsed_options.opt_strs("requirements-file") {
		let content = match std::fs::read_to_string(&file) {
			Ok(c) => c,
			Err(e) => {
				log::error!("Failed to read requirements file {}: {}", file, e);
				std::process::exit(2);
			}
		};
		for line in content.lines() {
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			match Requirement::from_str(line) {
				Ok(r) => requirements.push(r),
				Err(e) => {
					log::error!("Invalid requirement {:?} in {}: {}", line, file, e);
					std::process::exit(2);
				}
			}
		}
	}
	for free in &parsed_options.free {
		match Requirement::from_str(free) {
			Ok(r) => requirements.push(r),
			Err(e) => {
				log::error!("Invalid requirement {:?}: {}", free, e);
				std::process::exit(2);
			}
		}
	}

	if requirements.is_empty() && !parsed_options.opt_present("local") {
		log::error!("Nothing to resolve. Pass at least one requirement, -r FILE or --local NAME.");
		std::process::exit(2);
	}

	let evaluator = Arc::new(NixEvaluator::new(config.max_jobs(), config.nixpkgs_url().map(str::to_string)));

	log::info!("Loading the nixpkgs python package set.");
	let nixpkgs = match NixpkgsData::load(evaluator.clone()).await {
		Ok(data) => data,
		Err(e) => {
			log::error!("Failed to load the nixpkgs python package set: {}", e);
			std::process::exit(1);
		}
	};

	let client = Arc::new(PyPICache::new(config.index_url().to_string(), config.download_dir().clone()));
	let pypi = PyPIData::new(client, evaluator.clone());

	let should_load_tests = test_policy(
		parsed_options.opt_present("all-tests"),
		parsed_options.opt_strs("tests"),
		parsed_options.opt_strs("ignore-tests"),
	);

	let chooser = VersionChooser::new(
		nixpkgs,
		pypi,
		evaluate_package_requirements(evaluator.clone()),
		should_load_tests,
	);

	if let Some(local) = parsed_options.opt_str("local") {
		let cwd = std::env::current_dir().expect("failed to get current directory");
		if let Err(e) = chooser.require_local(&local, cwd).await {
			log::error!("Failed to resolve local package {}: {}", local, e);
			std::process::exit(1);
		}
	}

	let branches: Vec<_> = requirements.into_iter().map(|r| chooser.require(r, None)).collect();
	for result in futures::future::join_all(branches).await {
		if let Err(e) = result {
			log::error!("Resolution failed: {}", e);
			std::process::exit(1);
		}
	}

	let mut packages = chooser.all_packages();
	packages.sort_by(|a, b| a.name().cmp(b.name()));

	println!("Resolved {} packages:", packages.len());
	for package in packages {
		let provenance = match package.provenance() {
			Provenance::Nixpkgs => "nixpkgs",
			Provenance::Pypi => "pypi",
		};
		println!("\t{} {} ({}: {})", package.name(), package.version(), provenance, package.attribute_name());
	}
}

/// Builds the per-package test requirement policy from the console options.
fn test_policy(all_tests: bool, load_for: Vec<String>, ignore_for: Vec<String>) -> TestPolicy {
	let load_for: Vec<PackageName> = load_for.iter().map(|n| PackageName::new(n)).collect();
	let ignore_for: Vec<PackageName> = ignore_for.iter().map(|n| PackageName::new(n)).collect();

	Arc::new(move |name: &PackageName| {
		if ignore_for.contains(name) {
			return false;
		}
		all_tests || load_for.contains(name)
	})
}
