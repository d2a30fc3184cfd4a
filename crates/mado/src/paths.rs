use std::path::PathBuf;

/// Filesystem layout for one daemon: config, state, run and log directories.
///
/// `run_dir` and `log_dir` follow XDG state conventions unless overridden
/// (typically from the `[daemon]` config table).
#[derive(Debug, Clone)]
pub struct DaemonPaths {
	pub app_name: String,
	/// Name used for lock files, e.g. `shugod` → `shugod.pid`, `shugod.web.pid`.
	pub daemon_name: String,
	run_dir: Option<PathBuf>,
	log_dir: Option<PathBuf>,
}

impl DaemonPaths {
	pub fn new(app_name: impl Into<String>, daemon_name: impl Into<String>) -> Self {
		Self {
			app_name: app_name.into(),
			daemon_name: daemon_name.into(),
			run_dir: None,
			log_dir: None,
		}
	}

	pub fn with_run_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.run_dir = Some(dir.into());
		self
	}

	pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.log_dir = Some(dir.into());
		self
	}

	pub fn state_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".local").join("state").join(&self.app_name)
		} else {
			PathBuf::from("/tmp").join(&self.app_name)
		}
	}

	pub fn config_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".config").join(&self.app_name)
		} else {
			PathBuf::from("/tmp").join(&self.app_name).join("config")
		}
	}

	pub fn config_path(&self) -> PathBuf {
		self.config_dir().join("config.toml")
	}

	pub fn run_dir(&self) -> PathBuf {
		match &self.run_dir {
			Some(dir) => dir.clone(),
			None => self.state_dir().join("run"),
		}
	}

	pub fn log_dir(&self) -> PathBuf {
		match &self.log_dir {
			Some(dir) => dir.clone(),
			None => self.state_dir().join("logs"),
		}
	}

	/// Lock file of the daemon itself.
	pub fn lock_path(&self) -> PathBuf {
		self.run_dir().join(format!("{}.pid", self.daemon_name))
	}

	/// Lock file of one supervised service.
	pub fn service_lock_path(&self, service: &str) -> PathBuf {
		self.run_dir()
			.join(format!("{}.{}.pid", self.daemon_name, service))
	}

	pub fn log_path(&self) -> PathBuf {
		self.log_dir().join(format!("{}.log", self.daemon_name))
	}

	/// Output log of one supervised service.
	pub fn service_log_path(&self, service: &str) -> PathBuf {
		self.log_dir()
			.join(format!("{}.{}.log", self.daemon_name, service))
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}
