use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A control verb as received from the action mailbox.
///
/// Tokens are case sensitive. Anything outside the known set parses to
/// `Unrecognized` so the supervisor can log it and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	Stop,
	Status,
	Restart,
	Reload,
	/// No-op used purely for sequencing.
	Flush,
	Unrecognized(String),
}

impl Action {
	pub fn parse(token: &str) -> Self {
		match token {
			"stop" => Action::Stop,
			"status" => Action::Status,
			"restart" => Action::Restart,
			"reload" => Action::Reload,
			"flush" => Action::Flush,
			other => Action::Unrecognized(other.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Action::Stop => "stop",
			Action::Status => "status",
			Action::Restart => "restart",
			Action::Reload => "reload",
			Action::Flush => "flush",
			Action::Unrecognized(token) => token,
		}
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<&str> for Action {
	fn from(token: &str) -> Self {
		Action::parse(token)
	}
}

/// One configured service. Compared field by field on reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
	/// Split into argv with shell-word rules; no shell is spawned.
	pub command: String,
	pub working_dir: PathBuf,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub graceful_timeout: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub force_timeout: Option<f64>,
}

impl ServiceDefinition {
	pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
		Self {
			command: command.into(),
			working_dir: working_dir.into(),
			graceful_timeout: None,
			force_timeout: None,
		}
	}
}

/// Service definitions keyed by name.
pub type Definitions = BTreeMap<String, ServiceDefinition>;

/// How long `stop` waits after each signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTimeouts {
	pub graceful: Duration,
	pub force: Duration,
}

impl StopTimeouts {
	pub fn new(graceful: Duration, force: Duration) -> Self {
		Self { graceful, force }
	}

	/// Applies a definition's per-service overrides on top of these defaults.
	pub fn resolve(&self, definition: &ServiceDefinition) -> StopTimeouts {
		StopTimeouts {
			graceful: override_secs(definition.graceful_timeout, self.graceful),
			force: override_secs(definition.force_timeout, self.force),
		}
	}
}

impl Default for StopTimeouts {
	fn default() -> Self {
		Self::new(Duration::from_secs(4), Duration::from_secs(4))
	}
}

fn override_secs(value: Option<f64>, fallback: Duration) -> Duration {
	value
		.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
		.unwrap_or(fallback)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
	Unstarted,
	Running,
	Stopping,
	Stopped,
}

impl fmt::Display for ServiceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ServiceState::Unstarted => "unstarted",
			ServiceState::Running => "running",
			ServiceState::Stopping => "stopping",
			ServiceState::Stopped => "stopped",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
	pub pid: Option<u32>,
	pub alive: bool,
	pub lock_path: PathBuf,
	pub uptime_secs: u64,
	pub command: String,
	pub working_dir: PathBuf,
	pub state: ServiceState,
}

/// Status of every managed service, replaced as a whole on each `status`.
pub type StatusSnapshot = BTreeMap<String, ServiceStatus>;
