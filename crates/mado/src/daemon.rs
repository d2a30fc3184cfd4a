use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{dup2, fork, setsid, ForkResult};

use crate::error::{DaemonError, LockError};
use crate::lockfile::LockFile;
use crate::paths::DaemonPaths;

/// Owns the daemon's own lock file.
pub struct Daemon {
	pub paths: DaemonPaths,
	lock: LockFile,
}

/// Holds the daemon lock for the lifetime of the process; removes it on drop.
#[must_use = "dropping the guard releases the daemon lock"]
pub struct DaemonGuard {
	lock: LockFile,
}

impl Drop for DaemonGuard {
	fn drop(&mut self) {
		self.lock.release();
	}
}

impl Daemon {
	pub fn new(paths: DaemonPaths) -> Self {
		let lock = LockFile::new(paths.lock_path());
		Self { paths, lock }
	}

	pub fn lock_path(&self) -> PathBuf {
		self.lock.path().to_path_buf()
	}

	/// Detach from the controlling terminal and take the daemon lock.
	///
	/// Must be called before any threads (including an async runtime) exist.
	pub fn daemonize(&self) -> Result<DaemonGuard, DaemonError> {
		self.check_not_running()?;
		detach()?;
		self.lock.acquire(std::process::id())?;
		Ok(DaemonGuard {
			lock: self.lock.clone(),
		})
	}

	/// Take the daemon lock without detaching.
	pub fn lock_foreground(&self) -> Result<DaemonGuard, DaemonError> {
		self.lock.acquire(std::process::id())?;
		Ok(DaemonGuard {
			lock: self.lock.clone(),
		})
	}

	pub fn is_running(&self) -> bool {
		self.lock.is_locked()
	}

	pub fn read_pid(&self) -> Option<u32> {
		self.lock.read_pid()
	}

	/// Run `binary args...` for `ctl start` style commands and wait for it to
	/// hand off. The child is expected to daemonize itself, so its first parent
	/// exits as soon as the fork succeeds; startup errors before that point
	/// reach our stderr.
	pub fn spawn_background(&self, binary: &std::path::Path, args: &[&str]) -> Result<(), String> {
		if self.is_running() {
			return Err(format!(
				"daemon already running (pid {})",
				self.read_pid()
					.map(|p| p.to_string())
					.unwrap_or_else(|| "unknown".to_string())
			));
		}

		let mut cmd = std::process::Command::new(binary);
		cmd.args(args)
			.stdin(std::process::Stdio::null())
			.stdout(std::process::Stdio::null())
			.stderr(std::process::Stdio::inherit());

		let status = cmd
			.status()
			.map_err(|e| format!("failed to start daemon: {}", e))?;
		if status.success() {
			Ok(())
		} else {
			Err(format!("daemon exited during startup ({})", status))
		}
	}

	fn check_not_running(&self) -> Result<(), LockError> {
		if self.lock.is_locked() {
			return Err(LockError::AlreadyRunning {
				path: self.lock.path().to_path_buf(),
				pid: self.lock.read_pid(),
			});
		}
		Ok(())
	}
}

/// Classic double fork: the surviving grandchild has no controlling terminal,
/// is not a session leader, runs from `/` with a cleared umask and has its
/// standard streams on `/dev/null`.
pub fn detach() -> Result<(), DaemonError> {
	// SAFETY: called before any other thread exists; the parent only exits.
	match unsafe { fork() } {
		Ok(ForkResult::Parent { .. }) => std::process::exit(0),
		Ok(ForkResult::Child) => {}
		Err(source) => return Err(DaemonError::Fork { stage: "first", source }),
	}

	setsid().map_err(DaemonError::Session)?;
	std::env::set_current_dir("/").map_err(DaemonError::Redirect)?;
	umask(Mode::empty());

	// SAFETY: as above, still single-threaded.
	match unsafe { fork() } {
		Ok(ForkResult::Parent { .. }) => std::process::exit(0),
		Ok(ForkResult::Child) => {}
		Err(source) => return Err(DaemonError::Fork { stage: "second", source }),
	}

	redirect_stdio()
}

fn redirect_stdio() -> Result<(), DaemonError> {
	let null_in = File::open("/dev/null").map_err(DaemonError::Redirect)?;
	let null_out = OpenOptions::new()
		.append(true)
		.open("/dev/null")
		.map_err(DaemonError::Redirect)?;

	let to_io = |e: nix::Error| DaemonError::Redirect(std::io::Error::from(e));
	dup2(null_in.as_raw_fd(), STDIN_FILENO).map_err(to_io)?;
	dup2(null_out.as_raw_fd(), STDOUT_FILENO).map_err(to_io)?;
	dup2(null_out.as_raw_fd(), STDERR_FILENO).map_err(to_io)?;
	Ok(())
}
