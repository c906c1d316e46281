//! Bounded, retrying invocation of the Nix toolchain.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::{Error, Result};

/// Marker on the daemon's error stream for the one transient failure class
/// worth retrying. Textual match; the daemon offers no structured signal.
const TRANSIENT_STDERR_MARKER: &str = "all build users are currently in use";

const MAX_ATTEMPTS: u32 = 5;

/// Runs Nix builds and evaluations with a session-wide concurrency ceiling.
///
/// Every invocation holds a semaphore permit while its child process runs, so
/// the number of simultaneously-running Nix processes stays bounded no matter
/// how many resolution branches are in flight. One evaluator is constructed per
/// session and shared by everything that needs to invoke Nix.
pub struct NixEvaluator {
	semaphore: Semaphore,
	nixpkgs_url: Option<String>,
	build_command: String,
	instantiate_command: String,
}

impl NixEvaluator {
	/// # Parameters
	/// - `max_jobs` - Ceiling for concurrent Nix processes. Defaults to the available CPU parallelism.
	/// - `nixpkgs_url` - Pin evaluations to a nixpkgs snapshot tarball instead of `<nixpkgs>`.
	pub fn new(max_jobs: Option<usize>, nixpkgs_url: Option<String>) -> Self {
		let jobs = max_jobs.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
		NixEvaluator {
			semaphore: Semaphore::new(jobs),
			nixpkgs_url,
			build_command: "nix-build".to_string(),
			instantiate_command: "nix-instantiate".to_string(),
		}
	}

	/// Replaces the external commands. Tests substitute fake scripts here.
	pub fn with_commands(mut self, build: impl Into<String>, instantiate: impl Into<String>) -> Self {
		self.build_command = build.into();
		self.instantiate_command = instantiate.into();
		self
	}

	/// Realizes a derivation with `nix-build` and returns its store path.
	pub async fn build(&self, args: &[String]) -> Result<PathBuf> {
		let output = self.run(&self.build_command, args, None).await?;
		let stdout = String::from_utf8_lossy(&output.stdout);
		Ok(PathBuf::from(stdout.trim()))
	}

	/// Evaluates a Nix expression to JSON with `nix-instantiate`.
	pub async fn instantiate(&self, expr: &str) -> Result<serde_json::Value> {
		let args: Vec<String> = ["--eval", "--strict", "--json", "-"].iter().map(|s| s.to_string()).collect();
		let output = self.run(&self.instantiate_command, &args, Some(expr)).await?;
		Ok(serde_json::from_slice(&output.stdout)?)
	}

	async fn run(&self, command: &str, args: &[String], stdin: Option<&str>) -> Result<std::process::Output> {
		let mut args = args.to_vec();
		if let Some(url) = &self.nixpkgs_url {
			args.push("-I".to_string());
			args.push(format!("nixpkgs={}", url));
		}

		let mut attempt: u32 = 0;
		loop {
			let output = self.invoke(command, &args, stdin).await?;
			if output.status.success() {
				return Ok(output);
			}

			let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
			if stderr.contains(TRANSIENT_STDERR_MARKER) {
				if attempt + 1 < MAX_ATTEMPTS {
					let delay = 2u64.pow(attempt);
					log::warn!("all Nix build users are currently in use, retrying in {} seconds", delay);
					tokio::time::sleep(Duration::from_secs(delay)).await;
					attempt += 1;
					continue;
				}
				log::error!("giving up after {} failed attempts", MAX_ATTEMPTS);
			}
			return Err(Error::NixBuild {
				status: output.status.code().unwrap_or(-1),
				stderr,
			});
		}
	}

	/// One bounded child process. The permit is held for exactly the lifetime
	/// of the child, so a retry sleeping in backoff does not occupy a slot.
	async fn invoke(&self, command: &str, args: &[String], stdin: Option<&str>) -> Result<std::process::Output> {
		let _permit = self.semaphore.acquire().await.expect("evaluator semaphore closed");

		let mut cmd = Command::new(command);
		cmd.args(args);
		cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
		cmd.stdout(Stdio::piped());
		cmd.stderr(Stdio::piped());

		let mut child = cmd.spawn()?;
		if let Some(expr) = stdin {
			if let Some(mut pipe) = child.stdin.take() {
				pipe.write_all(expr.as_bytes()).await?;
			}
		}
		Ok(child.wait_with_output().await?)
	}
}
