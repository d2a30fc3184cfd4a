use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use mado::{ControlChannel, DaemonPaths, Polled};

use crate::config::ConfigSource;
use crate::error::SupervisorError;
use crate::process::ProcessHandle;
use crate::types::*;

/// How many dispatched actions `applied` remembers.
pub const APPLIED_HISTORY: usize = 256;

pub struct SupervisorOptions {
	/// How long the loop waits for an action before an idle tick.
	pub refresh_interval: Duration,
	/// Restart dead services on every idle tick.
	pub keep_alive: bool,
	/// Follow additions and removals in the configuration on reload.
	pub track_all: bool,
	pub timeouts: StopTimeouts,
	/// Append each service's stdout and stderr to its own log file.
	pub capture_output: bool,
}

impl Default for SupervisorOptions {
	fn default() -> Self {
		Self {
			refresh_interval: Duration::from_secs(10),
			keep_alive: false,
			track_all: false,
			timeouts: StopTimeouts::default(),
			capture_output: false,
		}
	}
}

/// Owns the managed services and applies actions from the control channel,
/// one at a time, in the order they arrive.
pub struct Supervisor<C> {
	source: C,
	options: SupervisorOptions,
	paths: DaemonPaths,
	channel: Arc<ControlChannel<StatusSnapshot>>,
	services: BTreeMap<String, ProcessHandle>,
	applied: VecDeque<Action>,
}

/// Pick the services to launch from `config`.
///
/// Either name services explicitly or pass `track_all`, not both. Every
/// requested name must be configured. `track_all` takes whatever is
/// configured, even nothing.
pub fn select_services(
	config: &Definitions,
	requested: &[String],
	track_all: bool,
) -> Result<Definitions, SupervisorError> {
	if track_all && !requested.is_empty() {
		return Err(SupervisorError::configuration(
			"naming services together with --all is redundant",
		));
	}

	if track_all {
		return Ok(config.clone());
	}

	if requested.is_empty() {
		return Err(SupervisorError::configuration(
			"no services specified (name some or pass --all)",
		));
	}

	let mut selected = Definitions::new();
	for name in requested {
		let definition = config
			.get(name)
			.ok_or_else(|| SupervisorError::configuration(format!("service not configured: {}", name)))?;
		selected.insert(name.clone(), definition.clone());
	}
	Ok(selected)
}

impl<C: ConfigSource> Supervisor<C> {
	pub fn new(
		source: C,
		options: SupervisorOptions,
		paths: DaemonPaths,
		channel: Arc<ControlChannel<StatusSnapshot>>,
	) -> Self {
		Self {
			source,
			options,
			paths,
			channel,
			services: BTreeMap::new(),
			applied: VecDeque::with_capacity(APPLIED_HISTORY),
		}
	}

	pub fn channel(&self) -> &Arc<ControlChannel<StatusSnapshot>> {
		&self.channel
	}

	pub fn service(&self, name: &str) -> Option<&ProcessHandle> {
		self.services.get(name)
	}

	pub fn service_names(&self) -> Vec<String> {
		self.services.keys().cloned().collect()
	}

	/// The last `APPLIED_HISTORY` actions taken off the mailbox, oldest first.
	pub fn applied(&self) -> &VecDeque<Action> {
		&self.applied
	}

	/// Launch each definition. Any failure aborts; services already started
	/// stay managed so `shutdown` can stop them.
	///
	/// An empty set is only valid in track-all mode, where services can
	/// arrive later through `reload`.
	pub fn start_services(&mut self, definitions: Definitions) -> Result<(), SupervisorError> {
		if definitions.is_empty() && !self.options.track_all {
			return Err(SupervisorError::configuration("no services to start"));
		}

		for (name, definition) in definitions {
			let mut handle = self.handle(&name, definition);
			handle.start()?;
			self.services.insert(name, handle);
		}
		Ok(())
	}

	/// Drain the action mailbox until `stop` arrives or `shutdown` resolves,
	/// then stop every service.
	///
	/// `shutdown` is only raced against the wait for the next action; an
	/// action already being applied always runs to completion.
	pub async fn run<F>(&mut self, shutdown: F)
	where
		F: Future<Output = ()>,
	{
		tokio::pin!(shutdown);
		tracing::info!(
			services = self.services.len(),
			keep_alive = self.options.keep_alive,
			"supervisor running"
		);

		loop {
			let channel = Arc::clone(&self.channel);
			let polled = tokio::select! {
				polled = channel.get_action(self.options.refresh_interval) => polled,
				_ = &mut shutdown => {
					tracing::info!("shutdown signal received");
					break;
				}
			};

			match polled {
				Polled::Idle => {
					if self.options.keep_alive {
						self.reconcile().await;
					}
				}
				Polled::Action(token) => {
					if self.dispatch(Action::parse(&token)).await.is_break() {
						break;
					}
				}
			}
		}

		self.shutdown().await;
	}

	/// Apply one action. Handler errors are logged here and never end the
	/// loop; only `stop` does.
	pub async fn dispatch(&mut self, action: Action) -> ControlFlow<()> {
		tracing::debug!(%action, "applying action");
		if self.applied.len() >= APPLIED_HISTORY {
			self.applied.pop_front();
		}
		self.applied.push_back(action.clone());

		let result = match action {
			Action::Stop => {
				tracing::info!("stop requested");
				return ControlFlow::Break(());
			}
			Action::Status => {
				self.status();
				Ok(())
			}
			Action::Restart => {
				self.restart_all().await;
				Ok(())
			}
			Action::Reload => self.reload().await,
			Action::Flush => Ok(()),
			Action::Unrecognized(token) => {
				tracing::error!("unrecognized action: {:?}", token);
				Ok(())
			}
		};

		if let Err(e) = result {
			tracing::error!("action failed: {}", e);
		}
		ControlFlow::Continue(())
	}

	/// Restart every managed service that is no longer alive.
	pub async fn reconcile(&mut self) {
		for (name, handle) in self.services.iter_mut() {
			if handle.is_alive() {
				continue;
			}
			tracing::warn!(service = %name, "not running; restarting");
			if let Err(e) = handle.restart().await {
				tracing::error!("keep-alive restart failed: {}", e);
			}
		}
	}

	/// Re-read the configuration and apply the difference.
	///
	/// Changed services are restarted with their new definition. Removed and
	/// added services are only acted on in track-all mode. A process that
	/// outlives its stop stays managed as it was; the next reload retries.
	pub async fn reload(&mut self) -> Result<(), SupervisorError> {
		let fresh = self.source.load()?;
		tracing::info!("reloading configuration ({} services)", fresh.len());

		let changed: Vec<String> = self
			.services
			.iter()
			.filter(|(name, handle)| {
				fresh
					.get(*name)
					.is_some_and(|definition| definition != handle.definition())
			})
			.map(|(name, _)| name.clone())
			.collect();

		for name in changed {
			let Some(handle) = self.services.get_mut(&name) else {
				continue;
			};
			tracing::info!(service = %name, "definition changed; restarting");
			if !stop_handle(handle).await {
				tracing::error!(service = %name, "old process still running; keeping previous definition");
				continue;
			}
			if let Some(definition) = fresh.get(&name) {
				self.launch(&name, definition.clone());
			}
		}

		let removed: Vec<String> = self
			.services
			.keys()
			.filter(|name| !fresh.contains_key(*name))
			.cloned()
			.collect();

		for name in removed {
			if !self.options.track_all {
				tracing::warn!(service = %name, "removed from configuration; left running");
				continue;
			}
			let Some(handle) = self.services.get_mut(&name) else {
				continue;
			};
			tracing::info!(service = %name, "removed from configuration; stopping");
			if stop_handle(handle).await {
				self.services.remove(&name);
			} else {
				tracing::error!(service = %name, "still running; keeping it managed");
			}
		}

		for (name, definition) in fresh {
			if self.services.contains_key(&name) {
				continue;
			}
			if self.options.track_all {
				tracing::info!(service = %name, "added to configuration; starting");
				self.launch(&name, definition);
			} else {
				tracing::debug!(service = %name, "added to configuration; not tracked");
			}
		}

		Ok(())
	}

	/// Restart every service, one after another, in name order.
	pub async fn restart_all(&mut self) {
		for (name, handle) in self.services.iter_mut() {
			tracing::info!(service = %name, "restarting");
			if let Err(e) = handle.restart().await {
				tracing::error!("restart failed: {}", e);
			}
		}
	}

	/// Rebuild the status snapshot and publish it on the channel.
	pub fn status(&mut self) -> StatusSnapshot {
		let snapshot: StatusSnapshot = self
			.services
			.iter_mut()
			.map(|(name, handle)| (name.clone(), handle.status()))
			.collect();
		self.channel.set_status(snapshot.clone());
		snapshot
	}

	/// Stop every service with its own timeouts, in name order.
	pub async fn shutdown(&mut self) {
		for (name, handle) in self.services.iter_mut() {
			tracing::debug!(service = %name, "shutting down");
			stop_handle(handle).await;
		}
		tracing::info!("all services stopped");
	}

	fn handle(&self, name: &str, definition: ServiceDefinition) -> ProcessHandle {
		let handle = ProcessHandle::new(
			name,
			definition,
			self.paths.service_lock_path(name),
			self.options.timeouts,
		);
		if self.options.capture_output {
			handle.with_output(self.paths.service_log_path(name))
		} else {
			handle
		}
	}

	/// Start a service and keep it managed even if the start fails, so the
	/// next keep-alive tick retries it.
	fn launch(&mut self, name: &str, definition: ServiceDefinition) {
		let mut handle = self.handle(name, definition);
		if let Err(e) = handle.start() {
			tracing::error!("failed to start: {}", e);
		}
		self.services.insert(name.to_string(), handle);
	}
}

async fn stop_handle(handle: &mut ProcessHandle) -> bool {
	let timeouts = handle.timeouts();
	handle.stop(timeouts.graceful, timeouts.force).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	fn config(names: &[&str]) -> Definitions {
		names
			.iter()
			.map(|n| (n.to_string(), ServiceDefinition::new("sleep 60", PathBuf::from("/tmp"))))
			.collect()
	}

	fn names(list: &[&str]) -> Vec<String> {
		list.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn select_explicit_names() {
		let selected = select_services(&config(&["a", "b", "c"]), &names(&["c", "a"]), false).unwrap();
		assert_eq!(selected.keys().cloned().collect::<Vec<_>>(), names(&["a", "c"]));
	}

	#[test]
	fn select_all() {
		let selected = select_services(&config(&["a", "b"]), &[], true).unwrap();
		assert_eq!(selected.len(), 2);
	}

	#[test]
	fn select_unknown_name_is_error() {
		let err = select_services(&config(&["a"]), &names(&["a", "zzz"]), false).unwrap_err();
		assert!(err.to_string().contains("zzz"));
	}

	#[test]
	fn select_nothing_is_error() {
		assert!(matches!(
			select_services(&config(&["a"]), &[], false),
			Err(SupervisorError::Configuration(_))
		));
	}

	#[test]
	fn select_all_with_empty_config_selects_nothing() {
		let selected = select_services(&Definitions::new(), &[], true).unwrap();
		assert!(selected.is_empty());
	}

	#[test]
	fn select_names_with_all_is_redundant() {
		let err = select_services(&config(&["a"]), &names(&["a"]), true).unwrap_err();
		assert!(err.to_string().contains("redundant"));
	}

	fn supervisor(dir: &std::path::Path) -> Supervisor<Definitions> {
		supervisor_with(dir, SupervisorOptions::default())
	}

	fn supervisor_with(dir: &std::path::Path, options: SupervisorOptions) -> Supervisor<Definitions> {
		Supervisor::new(
			config(&["a"]),
			options,
			DaemonPaths::new("shugo-test", "shugod").with_run_dir(dir),
			Arc::new(ControlChannel::new(StatusSnapshot::new())),
		)
	}

	#[tokio::test]
	async fn start_services_rejects_empty_set() {
		let dir = tempfile::tempdir().unwrap();
		let mut sup = supervisor(dir.path());
		assert!(matches!(
			sup.start_services(Definitions::new()),
			Err(SupervisorError::Configuration(_))
		));
	}

	#[tokio::test]
	async fn start_services_accepts_empty_set_in_track_all() {
		let dir = tempfile::tempdir().unwrap();
		let mut sup = supervisor_with(
			dir.path(),
			SupervisorOptions {
				track_all: true,
				..SupervisorOptions::default()
			},
		);
		sup.start_services(Definitions::new()).unwrap();
		assert!(sup.service_names().is_empty());

		// The configured service shows up on the next reload.
		sup.reload().await.unwrap();
		assert_eq!(sup.service_names(), names(&["a"]));
		assert!(sup.status()["a"].alive);
		sup.shutdown().await;
	}

	#[tokio::test]
	async fn applied_keeps_only_recent_history() {
		let dir = tempfile::tempdir().unwrap();
		let mut sup = supervisor(dir.path());

		for _ in 0..APPLIED_HISTORY + 40 {
			let _ = sup.dispatch(Action::Flush).await;
		}
		let _ = sup.dispatch(Action::Status).await;

		assert_eq!(sup.applied().len(), APPLIED_HISTORY);
		assert_eq!(sup.applied().back(), Some(&Action::Status));
		assert!(sup.applied().iter().rev().skip(1).all(|a| *a == Action::Flush));
	}

	#[tokio::test]
	async fn dispatch_records_and_stops_on_stop() {
		let dir = tempfile::tempdir().unwrap();
		let mut sup = supervisor(dir.path());

		assert!(sup.dispatch(Action::Flush).await.is_continue());
		assert!(sup.dispatch(Action::parse("bogus")).await.is_continue());
		assert!(sup.dispatch(Action::Stop).await.is_break());
		assert_eq!(
			sup.applied(),
			&[Action::Flush, Action::Unrecognized("bogus".into()), Action::Stop]
		);
	}

	#[tokio::test]
	async fn status_publishes_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let mut sup = supervisor(dir.path());
		sup.start_services(config(&["a"])).unwrap();

		let snapshot = sup.status();
		assert_eq!(sup.channel().get_status(), snapshot);
		let a = &snapshot["a"];
		assert!(a.alive);
		assert_eq!(a.lock_path, dir.path().join("shugod.a.pid"));

		sup.shutdown().await;
		assert!(!dir.path().join("shugod.a.pid").exists());
	}
}
