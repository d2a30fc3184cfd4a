use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::LockError;

/// A pid file whose presence means "an instance is running".
///
/// Exclusivity is decided by existence alone. A lock left behind by a crashed
/// owner blocks the next `acquire` until it is removed by hand.
#[derive(Debug, Clone)]
pub struct LockFile {
	path: PathBuf,
}

impl LockFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn is_locked(&self) -> bool {
		self.path.exists()
	}

	/// Pid recorded in the file, if it exists and parses.
	pub fn read_pid(&self) -> Option<u32> {
		std::fs::read_to_string(&self.path)
			.ok()
			.and_then(|s| s.trim().parse().ok())
	}

	/// Fails with `AlreadyRunning` if the file exists; otherwise creates it
	/// holding `pid`.
	pub fn acquire(&self, pid: u32) -> Result<(), LockError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
		}

		let mut file = match OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&self.path)
		{
			Ok(f) => f,
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
				return Err(LockError::AlreadyRunning {
					path: self.path.clone(),
					pid: self.read_pid(),
				});
			}
			Err(source) => return Err(self.io_error(source)),
		};

		writeln!(file, "{}", pid).map_err(|source| self.io_error(source))
	}

	/// Removes the file. A missing file is logged, not an error.
	pub fn release(&self) {
		match std::fs::remove_file(&self.path) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				tracing::warn!("lock file {} does not exist", self.path.display());
			}
			Err(e) => {
				tracing::warn!("failed to remove lock file {}: {}", self.path.display(), e);
			}
		}
	}

	fn io_error(&self, source: io::Error) -> LockError {
		LockError::Io {
			path: self.path.clone(),
			source,
		}
	}
}
