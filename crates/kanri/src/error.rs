use std::io;

use mado::{ClientError, LockError};
use thiserror::Error;

fn describe_pid(pid: &Option<u32>) -> String {
	match pid {
		Some(pid) => format!("pid {}", pid),
		None => "pid unknown".to_string(),
	}
}

#[derive(Debug, Error)]
pub enum SupervisorError {
	/// Bad selection or unreadable configuration. Fatal at startup only.
	#[error("configuration error: {0}")]
	Configuration(String),
	#[error("{name}: already running ({})", describe_pid(.pid))]
	AlreadyRunning { name: String, pid: Option<u32> },
	#[error("{name}: failed to spawn: {source}")]
	Spawn { name: String, source: io::Error },
	#[error("{name}: {source}")]
	Lock { name: String, source: LockError },
	#[error(transparent)]
	Channel(#[from] ClientError),
}

impl SupervisorError {
	pub fn configuration(message: impl Into<String>) -> Self {
		SupervisorError::Configuration(message.into())
	}
}
