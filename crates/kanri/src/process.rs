use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use mado::{LockError, LockFile};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::SupervisorError;
use crate::types::{ServiceDefinition, ServiceState, ServiceStatus, StopTimeouts};

/// One supervised OS process and the lock file proving it is ours.
pub struct ProcessHandle {
	name: String,
	definition: ServiceDefinition,
	timeouts: StopTimeouts,
	lock: LockFile,
	/// Set only after this handle wrote the lock file.
	owns_lock: bool,
	/// Where stdout and stderr go; inherited when unset.
	output: Option<PathBuf>,
	child: Option<Child>,
	pid: Option<u32>,
	started_at: Option<Instant>,
	state: ServiceState,
}

impl ProcessHandle {
	/// `defaults` are the daemon-wide stop timeouts; the definition may
	/// override either of them.
	pub fn new(
		name: impl Into<String>,
		definition: ServiceDefinition,
		lock_path: impl Into<PathBuf>,
		defaults: StopTimeouts,
	) -> Self {
		let timeouts = defaults.resolve(&definition);
		Self {
			name: name.into(),
			definition,
			timeouts,
			lock: LockFile::new(lock_path),
			owns_lock: false,
			output: None,
			child: None,
			pid: None,
			started_at: None,
			state: ServiceState::Unstarted,
		}
	}

	/// Append the child's stdout and stderr to `path` instead of inheriting
	/// ours.
	pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
		self.output = Some(path.into());
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn definition(&self) -> &ServiceDefinition {
		&self.definition
	}

	pub fn timeouts(&self) -> StopTimeouts {
		self.timeouts
	}

	pub fn lock_path(&self) -> &Path {
		self.lock.path()
	}

	/// Pid of the most recently started process.
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn started_at(&self) -> Option<Instant> {
		self.started_at
	}

	pub fn state(&self) -> ServiceState {
		self.state
	}

	pub fn uptime(&self) -> Duration {
		self.started_at
			.map(|started| started.elapsed())
			.unwrap_or(Duration::ZERO)
	}

	/// True while a child exists and has not exited. Reaps it if it has.
	pub fn is_alive(&mut self) -> bool {
		match self.child.as_mut() {
			Some(child) => match child.try_wait() {
				Ok(None) => true,
				Ok(Some(_)) => false,
				Err(e) => {
					tracing::warn!(service = %self.name, "failed to poll process: {}", e);
					false
				}
			},
			None => false,
		}
	}

	/// Spawn the service, refusing if its lock file already exists.
	pub fn start(&mut self) -> Result<(), SupervisorError> {
		if self.lock.is_locked() {
			return Err(SupervisorError::AlreadyRunning {
				name: self.name.clone(),
				pid: self.lock.read_pid(),
			});
		}

		let argv = self.argv()?;
		let Some((program, args)) = argv.split_first() else {
			return Err(self.spawn_error(io::Error::new(
				io::ErrorKind::InvalidInput,
				"empty command",
			)));
		};

		let (stdout, stderr) = self.stdio()?;
		let mut child = Command::new(program)
			.args(args)
			.current_dir(&self.definition.working_dir)
			.stdin(Stdio::null())
			.stdout(stdout)
			.stderr(stderr)
			.process_group(0)
			.spawn()
			.map_err(|e| self.spawn_error(e))?;

		let Some(pid) = child.id() else {
			return Err(self.spawn_error(io::Error::other("process exited before its pid was read")));
		};

		if let Err(e) = self.lock.acquire(pid) {
			// Someone took the lock between the check and the spawn.
			discard(child);
			return Err(match e {
				LockError::AlreadyRunning { pid, .. } => SupervisorError::AlreadyRunning {
					name: self.name.clone(),
					pid,
				},
				source => SupervisorError::Lock {
					name: self.name.clone(),
					source,
				},
			});
		}

		tracing::info!(service = %self.name, pid, "started: {}", self.definition.command);
		self.owns_lock = true;
		self.child = Some(child);
		self.pid = Some(pid);
		self.started_at = Some(Instant::now());
		self.state = ServiceState::Running;
		Ok(())
	}

	/// SIGINT the process group, then SIGTERM if it outlives `graceful`.
	///
	/// Returns whether the process is gone. Never fails: a process that
	/// survives both signals is logged as CRITICAL and left running, lock
	/// file in place, and `false` is returned.
	pub async fn stop(&mut self, graceful: Duration, force: Duration) -> bool {
		if !self.is_alive() {
			if self.child.is_some() {
				tracing::info!(service = %self.name, "already stopped");
				self.mark_stopped();
			}
			return true;
		}

		let Some(pid) = self.pid else {
			return true;
		};
		self.state = ServiceState::Stopping;

		tracing::info!(service = %self.name, pid, "stopping (SIGINT)");
		self.signal(pid, Signal::SIGINT);
		if self.wait_exit(graceful).await {
			self.mark_stopped();
			return true;
		}

		tracing::warn!(
			service = %self.name,
			pid,
			"still running after {:?}; sending SIGTERM",
			graceful
		);
		self.signal(pid, Signal::SIGTERM);
		if self.wait_exit(force).await {
			self.mark_stopped();
			return true;
		}

		tracing::error!(
			severity = "CRITICAL",
			service = %self.name,
			pid,
			"failed to stop process after SIGINT and SIGTERM"
		);
		self.state = ServiceState::Running;
		false
	}

	/// Stop with this service's own timeouts, then start again.
	pub async fn restart(&mut self) -> Result<(), SupervisorError> {
		self.stop(self.timeouts.graceful, self.timeouts.force).await;
		self.start()
	}

	pub fn status(&mut self) -> ServiceStatus {
		let alive = self.is_alive();
		ServiceStatus {
			pid: self.pid,
			alive,
			lock_path: self.lock.path().to_path_buf(),
			uptime_secs: self.uptime().as_secs(),
			command: self.definition.command.clone(),
			working_dir: self.definition.working_dir.clone(),
			state: self.state,
		}
	}

	fn argv(&self) -> Result<Vec<String>, SupervisorError> {
		shell_words::split(&self.definition.command).map_err(|e| {
			self.spawn_error(io::Error::new(io::ErrorKind::InvalidInput, e))
		})
	}

	fn stdio(&self) -> Result<(Stdio, Stdio), SupervisorError> {
		let Some(path) = &self.output else {
			return Ok((Stdio::inherit(), Stdio::inherit()));
		};
		if let Some(dir) = path.parent() {
			fs::create_dir_all(dir).map_err(|e| self.spawn_error(e))?;
		}
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.map_err(|e| self.spawn_error(e))?;
		let stderr = file.try_clone().map_err(|e| self.spawn_error(e))?;
		Ok((Stdio::from(file), Stdio::from(stderr)))
	}

	fn spawn_error(&self, source: io::Error) -> SupervisorError {
		SupervisorError::Spawn {
			name: self.name.clone(),
			source,
		}
	}

	fn signal(&self, pid: u32, signal: Signal) {
		let Ok(raw) = i32::try_from(pid) else {
			return;
		};
		if let Err(e) = killpg(Pid::from_raw(raw), signal) {
			tracing::debug!(service = %self.name, "{:?} to group {}: {}", signal, pid, e);
		}
	}

	async fn wait_exit(&mut self, timeout: Duration) -> bool {
		let Some(child) = self.child.as_mut() else {
			return true;
		};
		match tokio::time::timeout(timeout, child.wait()).await {
			Ok(Ok(status)) => {
				tracing::info!(service = %self.name, "exited: {}", status);
				true
			}
			Ok(Err(e)) => {
				tracing::warn!(service = %self.name, "failed waiting for exit: {}", e);
				false
			}
			Err(_) => false,
		}
	}

	fn mark_stopped(&mut self) {
		self.child = None;
		self.state = ServiceState::Stopped;
		if self.owns_lock {
			self.lock.release();
			self.owns_lock = false;
		}
	}
}

/// Kill a child we will not manage and reap it in the background.
fn discard(mut child: Child) {
	if let Err(e) = child.start_kill() {
		tracing::debug!("failed to kill discarded child: {}", e);
	}
	tokio::spawn(async move {
		let _ = child.wait().await;
	});
}
