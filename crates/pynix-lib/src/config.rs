//! Session options.

pub struct PynixOptions {
	download_dir: std::path::PathBuf,
	index_url: String,
	nixpkgs_url: Option<String>,
	max_jobs: Option<usize>,
}

impl Default for PynixOptions {
	fn default() -> Self {
		Self {
			download_dir: {
				#[cfg(target_os = "windows")]
				let path = std::path::PathBuf::from(std::env::var("APPDATA").expect("APPDATA missing."));

				#[cfg(not(target_os = "windows"))]
				let path = if let Ok(e) = std::env::var("XDG_CACHE_HOME") {
					std::path::PathBuf::from(e)
				} else {
					std::path::PathBuf::from(std::env::var("HOME").expect("HOME environment variable not set.")).join(".cache")
				};

				path.join("pynix").join("downloads")
			},
			index_url: "https://pypi.org/pypi".to_string(),
			nixpkgs_url: None,
			max_jobs: None,
		}
	}
}

impl PynixOptions {
	pub fn download_dir(&self) -> &std::path::PathBuf {
		&self.download_dir
	}
	pub fn set_download_dir(&mut self, download_dir: std::path::PathBuf) {
		self.download_dir = download_dir;
	}

	pub fn index_url(&self) -> &str {
		&self.index_url
	}
	pub fn set_index_url(&mut self, index_url: String) {
		self.index_url = index_url;
	}

	/// URL of a nixpkgs snapshot tarball to resolve against instead of `<nixpkgs>`.
	pub fn nixpkgs_url(&self) -> Option<&str> {
		self.nixpkgs_url.as_deref()
	}
	pub fn set_nixpkgs_url(&mut self, nixpkgs_url: Option<String>) {
		self.nixpkgs_url = nixpkgs_url;
	}

	/// Ceiling for concurrent Nix processes. `None` uses the CPU count.
	pub fn max_jobs(&self) -> Option<usize> {
		self.max_jobs
	}
	pub fn set_max_jobs(&mut self, max_jobs: Option<usize>) {
		self.max_jobs = max_jobs;
	}
}
