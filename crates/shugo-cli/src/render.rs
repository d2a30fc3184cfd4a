use kanri::{ServiceStatus, StatusSnapshot};
use owo_colors::OwoColorize;

/// One block per service: a coloured headline followed by `key: value` lines.
pub fn render_status(snapshot: &StatusSnapshot) -> String {
	if snapshot.is_empty() {
		return format!("{}\n", "no services".dimmed());
	}

	let mut out = String::new();
	for (name, status) in snapshot {
		out.push_str(&headline(name, status));
		out.push('\n');

		let key_width = 11;
		for (key, value) in details(status) {
			out.push_str(&format!("   {:<width$} {}\n", format!("{}:", key), value, width = key_width));
		}
	}
	out
}

fn headline(name: &str, status: &ServiceStatus) -> String {
	let circle = if status.alive { "●".green().to_string() } else { "●".red().to_string() };
	let liveness = if status.alive { "alive" } else { "dead" };
	let pid = status
		.pid
		.map(|p| p.to_string())
		.unwrap_or_else(|| "-".to_string());
	format!("{} {}: {} ({})", circle, name, liveness, pid)
}

fn details(status: &ServiceStatus) -> Vec<(&'static str, String)> {
	let uptime = if status.alive {
		format_uptime(status.uptime_secs)
	} else {
		"-".to_string()
	};
	vec![
		("state", status.state.to_string()),
		("uptime", uptime),
		("command", status.command.clone()),
		("cwd", status.working_dir.display().to_string()),
		("lock", status.lock_path.display().to_string()),
	]
}

const UNITS: [(u64, &str); 4] = [(86400, "d"), (3600, "h"), (60, "m"), (1, "s")];

/// Compact uptime using the two largest units, e.g. `1h2m`, `3d`.
pub fn format_uptime(secs: u64) -> String {
	let Some(i) = UNITS.iter().position(|(size, _)| secs >= *size) else {
		return "0s".to_string();
	};
	let (major, label) = UNITS[i];
	let mut out = format!("{}{}", secs / major, label);
	if let Some((minor, label)) = UNITS.get(i + 1) {
		let rest = secs % major / minor;
		if rest > 0 {
			out.push_str(&format!("{}{}", rest, label));
		}
	}
	out
}
