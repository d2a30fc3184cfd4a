use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kanri::*;
use mado::{ClientError, ControlChannel, DaemonPaths};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

const QUICK: Duration = Duration::from_millis(300);
const BARRIER: Duration = Duration::from_secs(10);

/// Configuration that tests can rewrite between reloads.
#[derive(Clone, Default)]
struct SharedConfig(Arc<Mutex<Definitions>>);

impl SharedConfig {
	fn set(&self, definitions: Definitions) {
		*self.0.lock().unwrap() = definitions;
	}
}

impl ConfigSource for SharedConfig {
	fn load(&self) -> Result<Definitions, SupervisorError> {
		Ok(self.0.lock().unwrap().clone())
	}
}

fn sleeper(dir: &Path) -> ServiceDefinition {
	ServiceDefinition::new("sleep 60", dir)
}

fn definitions(dir: &Path, names: &[&str]) -> Definitions {
	names
		.iter()
		.map(|n| (n.to_string(), sleeper(dir)))
		.collect()
}

fn supervisor<C: ConfigSource>(source: C, dir: &Path, options: SupervisorOptions) -> Supervisor<C> {
	Supervisor::new(
		source,
		options,
		DaemonPaths::new("shugo-test", "shugod").with_run_dir(dir),
		Arc::new(ControlChannel::new(StatusSnapshot::new())),
	)
}

fn options(track_all: bool, keep_alive: bool) -> SupervisorOptions {
	SupervisorOptions {
		refresh_interval: Duration::from_millis(100),
		keep_alive,
		track_all,
		timeouts: StopTimeouts::new(QUICK, QUICK),
		capture_output: false,
	}
}

fn stubborn(dir: &Path) -> ServiceDefinition {
	ServiceDefinition::new("sh -c \"trap '' INT TERM; sleep 60\"", dir)
}

fn pid_of<C: ConfigSource>(sup: &Supervisor<C>, name: &str) -> u32 {
	sup.service(name).and_then(|h| h.pid()).unwrap()
}

fn lock_files(dir: &Path) -> Vec<String> {
	let mut names: Vec<String> = std::fs::read_dir(dir)
		.unwrap()
		.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
		.filter(|n| n.ends_with(".pid"))
		.collect();
	names.sort();
	names
}

async fn fresh_status(channel: &ControlChannel<StatusSnapshot>) -> StatusSnapshot {
	channel.put_action("status".into(), BARRIER).await.unwrap();
	channel.put_action("flush".into(), BARRIER).await.unwrap();
	channel.put_action("flush".into(), BARRIER).await.unwrap();
	channel.get_status()
}

// --- ProcessHandle: stop escalation ---

#[tokio::test]
async fn cooperative_service_exits_on_sigint() {
	let dir = tempfile::tempdir().unwrap();
	let mut handle = ProcessHandle::new(
		"coop",
		sleeper(dir.path()),
		dir.path().join("shugod.coop.pid"),
		StopTimeouts::new(Duration::from_secs(5), QUICK),
	);
	handle.start().unwrap();

	let started = std::time::Instant::now();
	handle.stop(Duration::from_secs(5), QUICK).await;
	assert!(!handle.is_alive());
	assert_eq!(handle.state(), ServiceState::Stopped);
	assert!(started.elapsed() < Duration::from_secs(5));
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn stubborn_service_survives_stop_without_error() {
	let dir = tempfile::tempdir().unwrap();
	let mut handle = ProcessHandle::new(
		"stubborn",
		stubborn(dir.path()),
		dir.path().join("shugod.stubborn.pid"),
		StopTimeouts::new(QUICK, QUICK),
	);
	handle.start().unwrap();
	// Let the shell install its traps.
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert!(!handle.stop(QUICK, QUICK).await);
	assert!(handle.is_alive());
	assert_eq!(handle.state(), ServiceState::Running);
	assert_eq!(lock_files(dir.path()), vec!["shugod.stubborn.pid".to_string()]);

	// The kept lock blocks a restart.
	assert!(matches!(
		handle.restart().await,
		Err(SupervisorError::AlreadyRunning { .. })
	));

	let pid = handle.pid().unwrap() as i32;
	killpg(Pid::from_raw(pid), Signal::SIGKILL).unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	handle.stop(QUICK, QUICK).await;
	assert!(!handle.is_alive());
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn sigint_ignoring_service_stops_on_sigterm() {
	let dir = tempfile::tempdir().unwrap();
	let mut handle = ProcessHandle::new(
		"termonly",
		ServiceDefinition::new("sh -c \"trap '' INT; sleep 60\"", dir.path()),
		dir.path().join("shugod.termonly.pid"),
		StopTimeouts::new(QUICK, QUICK),
	);
	handle.start().unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;

	let started = std::time::Instant::now();
	assert!(handle.stop(QUICK, Duration::from_secs(5)).await);
	let elapsed = started.elapsed();

	// Waited out the graceful period, then SIGTERM worked well before the
	// forceful one ran out.
	assert!(elapsed >= QUICK);
	assert!(elapsed < Duration::from_secs(5));
	assert!(!handle.is_alive());
	assert_eq!(handle.state(), ServiceState::Stopped);
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn cooperative_service_never_sees_sigterm() {
	let dir = tempfile::tempdir().unwrap();
	let mut handle = ProcessHandle::new(
		"traps",
		ServiceDefinition::new(
			"sh -c \"trap 'echo int >> signals; exit 0' INT; trap 'echo term >> signals' TERM; sleep 60\"",
			dir.path(),
		),
		dir.path().join("shugod.traps.pid"),
		StopTimeouts::new(Duration::from_secs(5), Duration::from_secs(5)),
	);
	handle.start().unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert!(handle.stop(Duration::from_secs(5), Duration::from_secs(5)).await);
	let signals = std::fs::read_to_string(dir.path().join("signals")).unwrap();
	assert_eq!(signals.trim(), "int");
	assert!(lock_files(dir.path()).is_empty());
}

// --- Supervisor: restart ---

#[tokio::test]
async fn restart_replaces_process_and_keeps_one_lock() {
	let dir = tempfile::tempdir().unwrap();
	let config = definitions(dir.path(), &["a"]);
	let mut sup = supervisor(config.clone(), dir.path(), options(false, false));
	sup.start_services(config).unwrap();

	let old_pid = pid_of(&sup, "a");
	let old_started = sup.service("a").unwrap().started_at().unwrap();

	sup.restart_all().await;
	let new_pid = pid_of(&sup, "a");
	let new_started = sup.service("a").unwrap().started_at().unwrap();

	assert_ne!(old_pid, new_pid);
	assert!(new_started > old_started);
	assert_eq!(lock_files(dir.path()), vec!["shugod.a.pid".to_string()]);
	assert_eq!(
		std::fs::read_to_string(dir.path().join("shugod.a.pid")).unwrap().trim(),
		new_pid.to_string()
	);

	sup.shutdown().await;
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn start_services_fails_on_foreign_lock() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("shugod.a.pid"), "12345\n").unwrap();

	let config = definitions(dir.path(), &["a"]);
	let mut sup = supervisor(config.clone(), dir.path(), options(false, false));
	match sup.start_services(config) {
		Err(SupervisorError::AlreadyRunning { name, pid }) => {
			assert_eq!(name, "a");
			assert_eq!(pid, Some(12345));
		}
		Err(e) => panic!("expected AlreadyRunning, got {}", e),
		Ok(()) => panic!("expected AlreadyRunning, got Ok"),
	}
	assert!(dir.path().join("shugod.a.pid").exists());
}

// --- Supervisor: reload ---

#[tokio::test]
async fn reload_diff_in_track_all_mode() {
	let dir = tempfile::tempdir().unwrap();
	let source = SharedConfig::default();
	source.set(definitions(dir.path(), &["a", "b"]));

	let mut sup = supervisor(source.clone(), dir.path(), options(true, false));
	sup.start_services(source.load().unwrap()).unwrap();

	let b_pid = pid_of(&sup, "b");
	let b_started = sup.service("b").unwrap().started_at();

	source.set(definitions(dir.path(), &["b", "c"]));
	sup.reload().await.unwrap();

	assert_eq!(sup.service_names(), vec!["b".to_string(), "c".to_string()]);
	assert_eq!(pid_of(&sup, "b"), b_pid);
	assert_eq!(sup.service("b").unwrap().started_at(), b_started);

	let snapshot = sup.status();
	assert!(snapshot["c"].alive);
	assert!(!snapshot.contains_key("a"));
	assert_eq!(
		lock_files(dir.path()),
		vec!["shugod.b.pid".to_string(), "shugod.c.pid".to_string()]
	);

	sup.shutdown().await;
}

#[tokio::test]
async fn reload_restarts_changed_definition() {
	let dir = tempfile::tempdir().unwrap();
	let source = SharedConfig::default();
	source.set(definitions(dir.path(), &["a"]));

	let mut sup = supervisor(source.clone(), dir.path(), options(false, false));
	sup.start_services(source.load().unwrap()).unwrap();
	let old_pid = pid_of(&sup, "a");

	let mut changed = Definitions::new();
	changed.insert("a".into(), ServiceDefinition::new("sleep 61", dir.path()));
	source.set(changed);
	sup.reload().await.unwrap();

	let handle = sup.service("a").unwrap();
	assert_eq!(handle.definition().command, "sleep 61");
	assert_ne!(handle.pid().unwrap(), old_pid);
	assert_eq!(lock_files(dir.path()), vec!["shugod.a.pid".to_string()]);

	sup.shutdown().await;
}

#[tokio::test]
async fn reload_without_track_all_leaves_membership_alone() {
	let dir = tempfile::tempdir().unwrap();
	let source = SharedConfig::default();
	source.set(definitions(dir.path(), &["a", "b"]));

	let mut sup = supervisor(source.clone(), dir.path(), options(false, false));
	sup.start_services(select_services(&source.load().unwrap(), &["a".to_string()], false).unwrap())
		.unwrap();
	let a_pid = pid_of(&sup, "a");

	// "a" removed, "c" added: neither is acted on.
	source.set(definitions(dir.path(), &["b", "c"]));
	sup.reload().await.unwrap();

	assert_eq!(sup.service_names(), vec!["a".to_string()]);
	assert_eq!(pid_of(&sup, "a"), a_pid);
	let snapshot = sup.status();
	assert!(snapshot["a"].alive);

	sup.shutdown().await;
}

#[tokio::test]
async fn reload_keeps_survivor_of_stop_managed() {
	let dir = tempfile::tempdir().unwrap();
	let source = SharedConfig::default();
	let mut initial = Definitions::new();
	initial.insert("a".into(), stubborn(dir.path()));
	source.set(initial.clone());

	let mut sup = supervisor(source.clone(), dir.path(), options(true, false));
	sup.start_services(source.load().unwrap()).unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	let pid = pid_of(&sup, "a");

	// Removal: the process ignores both signals, so it stays ours.
	source.set(Definitions::new());
	sup.reload().await.unwrap();
	assert_eq!(sup.service_names(), vec!["a".to_string()]);
	assert!(sup.status()["a"].alive);
	assert_eq!(lock_files(dir.path()), vec!["shugod.a.pid".to_string()]);

	// Changed definition: no relaunch over the survivor.
	let mut changed = Definitions::new();
	changed.insert("a".into(), sleeper(dir.path()));
	source.set(changed);
	sup.reload().await.unwrap();
	let handle = sup.service("a").unwrap();
	assert_eq!(handle.pid(), Some(pid));
	assert_eq!(handle.definition(), &stubborn(dir.path()));

	// Once it is really gone the pending change applies.
	killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	sup.reload().await.unwrap();
	let handle = sup.service("a").unwrap();
	assert_eq!(handle.definition().command, "sleep 60");
	assert_ne!(handle.pid(), Some(pid));
	assert_eq!(lock_files(dir.path()), vec!["shugod.a.pid".to_string()]);

	sup.shutdown().await;
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn track_all_starts_empty_and_picks_up_services_on_reload() {
	let dir = tempfile::tempdir().unwrap();
	let source = SharedConfig::default();

	let selected = select_services(&source.load().unwrap(), &[], true).unwrap();
	let mut sup = supervisor(source.clone(), dir.path(), options(true, false));
	sup.start_services(selected).unwrap();
	assert!(sup.service_names().is_empty());

	source.set(definitions(dir.path(), &["a"]));
	sup.reload().await.unwrap();
	assert!(sup.status()["a"].alive);

	sup.shutdown().await;
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn captured_output_lands_in_service_log() {
	let dir = tempfile::tempdir().unwrap();
	let logs = dir.path().join("logs");
	let mut config = Definitions::new();
	config.insert(
		"talker".into(),
		ServiceDefinition::new("sh -c \"echo hello-out; echo hello-err >&2; sleep 60\"", dir.path()),
	);

	let mut sup = Supervisor::new(
		config.clone(),
		SupervisorOptions {
			capture_output: true,
			..options(false, false)
		},
		DaemonPaths::new("shugo-test", "shugod")
			.with_run_dir(dir.path())
			.with_log_dir(&logs),
		Arc::new(ControlChannel::new(StatusSnapshot::new())),
	);
	sup.start_services(config).unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	sup.shutdown().await;

	let captured = std::fs::read_to_string(logs.join("shugod.talker.log")).unwrap();
	assert!(captured.contains("hello-out"));
	assert!(captured.contains("hello-err"));
}

// --- Supervisor: control loop ---

#[tokio::test]
async fn keep_alive_relaunches_killed_service() {
	let dir = tempfile::tempdir().unwrap();
	let config = definitions(dir.path(), &["a", "b"]);
	let mut sup = supervisor(config.clone(), dir.path(), options(false, true));
	sup.start_services(config).unwrap();

	let a_pid = pid_of(&sup, "a");
	let b_pid = pid_of(&sup, "b");
	let channel = Arc::clone(sup.channel());

	let (tx, rx) = tokio::sync::oneshot::channel::<()>();
	let task = tokio::spawn(async move {
		sup.run(async move {
			let _ = rx.await;
		})
		.await;
		sup
	});

	kill(Pid::from_raw(b_pid as i32), Signal::SIGKILL).unwrap();
	tokio::time::sleep(Duration::from_millis(800)).await;

	let snapshot = fresh_status(&channel).await;
	assert_eq!(snapshot["a"].pid, Some(a_pid));
	assert!(snapshot["b"].alive);
	assert_ne!(snapshot["b"].pid, Some(b_pid));

	tx.send(()).unwrap();
	let sup = task.await.unwrap();
	assert_eq!(sup.service("b").unwrap().state(), ServiceState::Stopped);
	assert!(lock_files(dir.path()).is_empty());
}

#[tokio::test]
async fn actions_are_applied_in_submission_order() {
	let dir = tempfile::tempdir().unwrap();
	let config = definitions(dir.path(), &["a"]);
	let mut sup = supervisor(config.clone(), dir.path(), options(false, false));
	sup.start_services(config).unwrap();
	let channel = Arc::clone(sup.channel());

	let task = tokio::spawn(async move {
		sup.run(std::future::pending()).await;
		sup
	});

	for token in ["status", "flush", "restart", "flush", "bogus", "flush", "reload", "flush", "stop"] {
		channel.put_action(token.into(), BARRIER).await.unwrap();
	}

	let sup = task.await.unwrap();
	assert_eq!(
		sup.applied(),
		&[
			Action::Status,
			Action::Flush,
			Action::Restart,
			Action::Flush,
			Action::Unrecognized("bogus".into()),
			Action::Flush,
			Action::Reload,
			Action::Flush,
			Action::Stop,
		]
	);
	assert!(lock_files(dir.path()).is_empty());
}

// --- Controller over TCP ---

#[tokio::test]
async fn controller_status_reflects_request_time() {
	let dir = tempfile::tempdir().unwrap();
	let config = definitions(dir.path(), &["a", "b"]);
	let mut sup = supervisor(config.clone(), dir.path(), options(false, false));
	sup.start_services(config).unwrap();
	let channel = Arc::clone(sup.channel());

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap().to_string();
	let key: Arc<[u8]> = Arc::from(&b"kanri-test"[..]);
	let server = tokio::spawn(mado::server::serve(listener, channel, key));

	let task = tokio::spawn(async move {
		sup.run(std::future::pending()).await;
		sup
	});

	let snapshot = tokio::task::spawn_blocking(move || {
		let mut controller = Controller::connect(&addr, b"kanri-test", Duration::from_secs(2)).unwrap();
		let snapshot = controller.status().unwrap();
		controller.request(&Action::Stop).unwrap();
		snapshot
	})
	.await
	.unwrap();

	// The slot starts empty, so anything here came from the request.
	assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
	assert!(snapshot.values().all(|s| s.alive && s.state == ServiceState::Running));

	task.await.unwrap();
	server.abort();
}

#[test]
fn controller_without_daemon_is_unreachable() {
	let addr = {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		listener.local_addr().unwrap().to_string()
	};
	match Controller::connect(&addr, b"key", Duration::from_secs(1)) {
		Err(SupervisorError::Channel(ClientError::Unreachable { .. })) => {}
		Err(e) => panic!("expected Unreachable, got {}", e),
		Ok(_) => panic!("expected Unreachable, got Ok"),
	}
}
