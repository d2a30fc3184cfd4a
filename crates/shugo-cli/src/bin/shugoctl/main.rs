use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use kanri::{Action, Controller, SupervisorError};
use mado::{ClientError, Daemon};
use owo_colors::OwoColorize;
use shugo::config::{self, GlobalConfig};
use shugo::{exit, logging, render};

/// Control a running shugod.
#[derive(Debug, Parser)]
#[command(name = "shugoctl", version)]
struct Args {
	action: Command,

	/// Config file path (shared with shugod)
	#[arg(short, long, env = "SHUGO_CONFIG")]
	config: Option<PathBuf>,

	/// Debug logging
	#[arg(short, long)]
	verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Command {
	/// Launch shugod in the background for every configured service
	Start,
	/// Stop all services and the daemon
	Stop,
	/// Show the status of every service
	Status,
	/// Restart every service
	Restart,
	/// Re-read the config file and apply changes
	Reload,
}

impl Command {
	fn action(self) -> Option<Action> {
		match self {
			Command::Start => None,
			Command::Stop => Some(Action::Stop),
			Command::Status => Some(Action::Status),
			Command::Restart => Some(Action::Restart),
			Command::Reload => Some(Action::Reload),
		}
	}
}

fn main() -> ExitCode {
	let args = Args::parse();
	logging::init_stderr("warn", args.verbose);

	match run(&args) {
		Ok(()) => ExitCode::from(exit::SUCCESS),
		Err(e) => {
			report(&e);
			ExitCode::from(exit::code_for(&e))
		}
	}
}

fn run(args: &Args) -> anyhow::Result<()> {
	let cwd = std::env::current_dir().context("failed to read current directory")?;
	let config_path = cwd.join(args.config.clone().unwrap_or_else(config::default_path));
	let global = config::load(&config_path)?;

	match args.action.action() {
		None => start(&global, &config_path, args.verbose),
		Some(Action::Status) => {
			let mut controller = connect(&global)?;
			let snapshot = controller.status()?;
			print!("{}", render::render_status(&snapshot));
			Ok(())
		}
		Some(action) => {
			let mut controller = connect(&global)?;
			controller.request(&action)?;
			tracing::debug!(%action, "sent");
			Ok(())
		}
	}
}

fn connect(global: &GlobalConfig) -> Result<Controller, SupervisorError> {
	Controller::connect(
		&global.daemon.address(),
		global.daemon.key.as_bytes(),
		global.daemon.request_timeout(),
	)
}

/// Run `shugod --all --keep-alive --daemon` against the same config.
fn start(global: &GlobalConfig, config_path: &Path, verbose: bool) -> anyhow::Result<()> {
	let daemon = Daemon::new(global.daemon.paths());
	let binary = shugod_binary();
	let config_arg = config_path.to_string_lossy().into_owned();

	let mut args = vec!["--all", "--keep-alive", "--daemon", "--config", config_arg.as_str()];
	if verbose {
		args.push("--verbose");
	}
	tracing::debug!("launching {} {}", binary.display(), args.join(" "));

	if let Err(e) = daemon.spawn_background(&binary, &args) {
		bail!(e);
	}
	eprintln!("shugod started");
	Ok(())
}

/// Prefer the `shugod` installed next to this binary, then `$PATH`.
fn shugod_binary() -> PathBuf {
	std::env::current_exe()
		.ok()
		.map(|exe| exe.with_file_name("shugod"))
		.filter(|candidate| candidate.exists())
		.unwrap_or_else(|| PathBuf::from("shugod"))
}

fn report(error: &anyhow::Error) {
	let prefix = "error:".red().bold().to_string();
	match error.downcast_ref::<SupervisorError>() {
		Some(SupervisorError::Channel(ClientError::Unreachable { addr, .. })) => {
			eprintln!("{} shugod is not running (nothing listening on {})", prefix, addr);
			eprintln!("start it with: shugoctl start");
		}
		Some(SupervisorError::Channel(ClientError::Busy)) => {
			eprintln!("{} shugod is busy; try again", prefix);
		}
		_ => eprintln!("{} {:#}", prefix, error),
	}
}
