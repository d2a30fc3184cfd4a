use kanri::{ConfigSource, Definitions, ServiceDefinition, StopTimeouts, SupervisorError};
use mado::DaemonPaths;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "shugo";
pub const DAEMON_NAME: &str = "shugod";

/// Shipped placeholder for `daemon.key`. Running with it logs a warning.
pub const DEFAULT_KEY: &str = "change-me";

// ── config.toml ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
	#[serde(default)]
	pub daemon: DaemonConfig,
	#[serde(default)]
	pub service: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
	pub host: String,
	pub port: u16,
	pub key: String,
	/// Seconds between keep-alive ticks.
	pub refresh: f64,
	/// Seconds to wait after SIGINT.
	pub timeout: f64,
	/// Seconds to wait after SIGTERM. Defaults to `timeout`.
	pub force_timeout: Option<f64>,
	/// Seconds a client waits for room in the action mailbox.
	pub request_timeout: f64,
	pub run_dir: Option<PathBuf>,
	pub log_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			port: 50000,
			key: DEFAULT_KEY.into(),
			refresh: 10.0,
			timeout: 4.0,
			force_timeout: None,
			request_timeout: 10.0,
			run_dir: None,
			log_dir: None,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
	pub command: String,
	pub working_dir: Option<PathBuf>,
	pub timeout: Option<f64>,
	pub force_timeout: Option<f64>,
}

impl DaemonConfig {
	pub fn address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn refresh_interval(&self) -> Duration {
		seconds(self.refresh)
	}

	pub fn request_timeout(&self) -> Duration {
		seconds(self.request_timeout)
	}

	pub fn stop_timeouts(&self) -> StopTimeouts {
		let graceful = seconds(self.timeout);
		let force = self
			.force_timeout
			.map(seconds)
			.unwrap_or(graceful);
		StopTimeouts::new(graceful, force)
	}

	pub fn uses_default_key(&self) -> bool {
		self.key == DEFAULT_KEY
	}

	pub fn paths(&self) -> DaemonPaths {
		let mut paths = DaemonPaths::new(APP_NAME, DAEMON_NAME);
		if let Some(dir) = &self.run_dir {
			paths = paths.with_run_dir(dir);
		}
		if let Some(dir) = &self.log_dir {
			paths = paths.with_log_dir(dir);
		}
		paths
	}

	fn validate(&self) -> Result<(), String> {
		let mut durations = vec![
			("refresh", self.refresh),
			("timeout", self.timeout),
			("request_timeout", self.request_timeout),
		];
		if let Some(force) = self.force_timeout {
			durations.push(("force_timeout", force));
		}
		for (field, value) in durations {
			check_seconds(&format!("daemon.{}", field), value)?;
		}
		if self.key.is_empty() {
			return Err("daemon.key must not be empty".into());
		}
		Ok(())
	}
}

impl GlobalConfig {
	pub fn parse(content: &str) -> Result<Self, String> {
		let config: GlobalConfig = toml::from_str(content).map_err(|e| e.to_string())?;
		config.daemon.validate()?;
		for (name, entry) in &config.service {
			if name.is_empty() || name.contains('/') {
				return Err(format!("invalid service name {:?}", name));
			}
			if entry.command.trim().is_empty() {
				return Err(format!("service.{}: command must not be empty", name));
			}
			if let Some(timeout) = entry.timeout {
				check_seconds(&format!("service.{}.timeout", name), timeout)?;
			}
			if let Some(force) = entry.force_timeout {
				check_seconds(&format!("service.{}.force_timeout", name), force)?;
			}
		}
		Ok(config)
	}

	/// Service definitions with relative working directories resolved
	/// against `base_dir`. Services without one run in `base_dir`.
	pub fn definitions(&self, base_dir: &Path) -> Definitions {
		self.service
			.iter()
			.map(|(name, entry)| {
				let working_dir = match &entry.working_dir {
					Some(dir) => base_dir.join(dir),
					None => base_dir.to_path_buf(),
				};
				let definition = ServiceDefinition {
					command: entry.command.clone(),
					working_dir,
					graceful_timeout: entry.timeout,
					force_timeout: entry.force_timeout,
				};
				(name.clone(), definition)
			})
			.collect()
	}
}

fn check_seconds(field: &str, value: f64) -> Result<(), String> {
	if value <= 0.0 || Duration::try_from_secs_f64(value).is_err() {
		return Err(format!("{} must be a positive number of seconds", field));
	}
	Ok(())
}

fn seconds(value: f64) -> Duration {
	Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Default location: `$XDG_CONFIG_HOME/shugo/config.toml`.
pub fn default_path() -> PathBuf {
	DaemonPaths::new(APP_NAME, DAEMON_NAME).config_path()
}

/// Read and validate the config file. A missing file is an empty config.
pub fn load(path: &Path) -> Result<GlobalConfig, SupervisorError> {
	if !path.exists() {
		tracing::debug!("no config at {}; using defaults", path.display());
		return Ok(GlobalConfig::default());
	}

	let content = std::fs::read_to_string(path).map_err(|e| {
		SupervisorError::configuration(format!("failed to read {}: {}", path.display(), e))
	})?;
	GlobalConfig::parse(&content)
		.map_err(|e| SupervisorError::configuration(format!("{}: {}", path.display(), e)))
}

/// Re-reads the config file on every `reload`.
pub struct FileConfigSource {
	path: PathBuf,
	base_dir: PathBuf,
}

impl FileConfigSource {
	/// `base_dir` is captured once so relative paths keep resolving the same
	/// way after the daemon has changed directory.
	pub fn new(path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
		let base_dir = base_dir.into();
		let path = base_dir.join(path.into());
		Self { path, base_dir }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl ConfigSource for FileConfigSource {
	fn load(&self) -> Result<Definitions, SupervisorError> {
		Ok(load(&self.path)?.definitions(&self.base_dir))
	}
}
