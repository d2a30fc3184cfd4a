use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kanri::{select_services, Definitions, StatusSnapshot, Supervisor, SupervisorOptions};
use mado::{ControlChannel, Daemon};
use owo_colors::OwoColorize;
use shugo::config::{self, FileConfigSource, GlobalConfig};
use shugo::{exit, logging};

/// Supervise configured services and serve the control channel.
#[derive(Debug, Parser)]
#[command(name = "shugod", version)]
struct Args {
	/// Services to supervise (from the config file)
	services: Vec<String>,

	/// Supervise every configured service, following reloads
	#[arg(long)]
	all: bool,

	/// Restart services that die, checked every `daemon.refresh` seconds
	#[arg(long)]
	keep_alive: bool,

	/// Detach and log to the daemon log file
	#[arg(short, long)]
	daemon: bool,

	/// Config file path
	#[arg(short, long, env = "SHUGO_CONFIG")]
	config: Option<PathBuf>,

	/// Debug logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> ExitCode {
	let args = Args::parse();
	match run(args) {
		Ok(()) => ExitCode::from(exit::SUCCESS),
		Err(e) => {
			tracing::error!("{:#}", e);
			eprintln!("{} {:#}", "error:".red().bold(), e);
			ExitCode::from(exit::code_for(&e))
		}
	}
}

fn run(args: Args) -> anyhow::Result<()> {
	// Captured before detaching, which moves us to `/`.
	let base_dir = std::env::current_dir().context("failed to read current directory")?;
	let source = FileConfigSource::new(args.config.clone().unwrap_or_else(config::default_path), &base_dir);

	let global = config::load(source.path())?;
	let selected = select_services(&global.definitions(&base_dir), &args.services, args.all)?;

	let paths = global.daemon.paths();
	let daemon = Daemon::new(paths.clone());
	let _guard = if args.daemon {
		let guard = daemon.daemonize()?;
		logging::init_file(&paths.log_path(), "info", args.verbose)?;
		guard
	} else {
		let guard = daemon.lock_foreground()?;
		logging::init_stderr("info", args.verbose);
		guard
	};

	tracing::info!(
		pid = std::process::id(),
		config = %source.path().display(),
		"shugod starting"
	);
	if global.daemon.uses_default_key() {
		tracing::warn!("daemon.key is the default placeholder; set a shared secret in the config");
	}

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("failed to build async runtime")?;
	runtime.block_on(supervise(global, selected, source, &args))
}

async fn supervise(
	global: GlobalConfig,
	selected: Definitions,
	source: FileConfigSource,
	args: &Args,
) -> anyhow::Result<()> {
	let address = global.daemon.address();
	let listener = tokio::net::TcpListener::bind(&address)
		.await
		.with_context(|| format!("failed to bind control channel on {}", address))?;

	let channel = Arc::new(ControlChannel::new(StatusSnapshot::new()));
	let key: Arc<[u8]> = Arc::from(global.daemon.key.as_bytes());
	let server = tokio::spawn(mado::server::serve(listener, Arc::clone(&channel), key));

	let options = SupervisorOptions {
		refresh_interval: global.daemon.refresh_interval(),
		keep_alive: args.keep_alive,
		track_all: args.all,
		timeouts: global.daemon.stop_timeouts(),
		// Our own stdio is /dev/null once detached.
		capture_output: args.daemon,
	};
	let mut supervisor = Supervisor::new(source, options, global.daemon.paths(), channel);

	if let Err(e) = supervisor.start_services(selected) {
		supervisor.shutdown().await;
		server.abort();
		return Err(e.into());
	}

	supervisor.run(shutdown_signal()).await;
	server.abort();
	tracing::info!("shugod stopped");
	Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let interrupt = async {
		match signal(SignalKind::interrupt()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				tracing::warn!("cannot listen for SIGINT: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};
	let terminate = async {
		match signal(SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				tracing::warn!("cannot listen for SIGTERM: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	tokio::select! {
		_ = interrupt => tracing::info!("received SIGINT"),
		_ = terminate => tracing::info!("received SIGTERM"),
	}
}
