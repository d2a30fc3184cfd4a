use std::io;
use std::path::PathBuf;

use thiserror::Error;

fn describe_pid(pid: &Option<u32>) -> String {
	match pid {
		Some(pid) => format!("pid {}", pid),
		None => "pid unknown".to_string(),
	}
}

#[derive(Debug, Error)]
pub enum LockError {
	/// The lock file exists. Only existence is checked; the pid may be stale.
	#[error("already running ({}, lock {})", describe_pid(.pid), .path.display())]
	AlreadyRunning { path: PathBuf, pid: Option<u32> },
	#[error("lock file {}: {source}", .path.display())]
	Io { path: PathBuf, source: io::Error },
}

impl LockError {
	pub fn pid(&self) -> Option<u32> {
		match self {
			LockError::AlreadyRunning { pid, .. } => *pid,
			LockError::Io { .. } => None,
		}
	}
}

#[derive(Debug, Error)]
pub enum DaemonError {
	#[error(transparent)]
	Lock(#[from] LockError),
	#[error("failed to create {stage} fork: {source}")]
	Fork { stage: &'static str, source: nix::Error },
	#[error("failed to start new session: {0}")]
	Session(nix::Error),
	#[error("failed to redirect standard streams: {0}")]
	Redirect(io::Error),
}

/// Mailbox conditions. Neither is fatal: callers retry or treat them as
/// backpressure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
	#[error("action mailbox is busy")]
	Busy,
	#[error("action mailbox is closed")]
	Closed,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("frame of {0} bytes exceeds limit")]
	FrameTooLarge(usize),
	#[error("malformed message: {0}")]
	Malformed(#[from] serde_json::Error),
	#[error("authentication failed")]
	AuthenticationFailed,
	#[error("handshake timed out")]
	HandshakeTimeout,
}

#[derive(Debug, Error)]
pub enum ClientError {
	/// Nothing is listening: the daemon is down. Never retried.
	#[error("daemon unreachable at {addr}: {source}")]
	Unreachable { addr: String, source: io::Error },
	/// The action mailbox stayed full for the whole timeout.
	#[error("daemon busy: action mailbox full")]
	Busy,
	#[error("authentication failed (check the shared key)")]
	AuthenticationFailed,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error("daemon error: {0}")]
	Remote(String),
}

impl From<ProtocolError> for ClientError {
	fn from(e: ProtocolError) -> Self {
		match e {
			ProtocolError::Io(e) => ClientError::Io(e),
			ProtocolError::AuthenticationFailed => ClientError::AuthenticationFailed,
			other => ClientError::Protocol(other.to_string()),
		}
	}
}
