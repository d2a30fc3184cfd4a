use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins unless `--verbose` asks for debug output.
fn filter(default_level: &str, verbose: bool) -> EnvFilter {
	if verbose {
		return EnvFilter::new("debug");
	}
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub fn init_stderr(default_level: &str, verbose: bool) {
	tracing_subscriber::registry()
		.with(filter(default_level, verbose))
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();
}

/// Append to `path`, creating it and its directory if needed.
pub fn init_file(path: &Path, default_level: &str, verbose: bool) -> anyhow::Result<()> {
	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir)
			.with_context(|| format!("failed to create log directory {}", dir.display()))?;
	}
	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.with_context(|| format!("failed to open log file {}", path.display()))?;

	tracing_subscriber::registry()
		.with(filter(default_level, verbose))
		.with(
			tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false),
		)
		.init();
	Ok(())
}
