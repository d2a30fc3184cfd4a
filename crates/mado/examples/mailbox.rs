use std::sync::Arc;
use std::time::Duration;

use mado::{ControlChannel, ControlClient, Polled};

const ADDR: &str = "127.0.0.1:50123";
const KEY: &[u8] = b"mailbox-example";

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().collect();
	let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

	match cmd {
		"run" => {
			let channel = Arc::new(ControlChannel::new(Vec::<String>::new()));
			let listener = match tokio::net::TcpListener::bind(ADDR).await {
				Ok(l) => l,
				Err(e) => {
					eprintln!("bind {ADDR}: {e}");
					return;
				}
			};
			tokio::spawn(mado::server::serve(listener, Arc::clone(&channel), Arc::from(KEY)));

			// Single consumer: every token is appended to the status log.
			let mut seen = Vec::new();
			loop {
				match channel.get_action(Duration::from_secs(5)).await {
					Polled::Action(token) if token == "stop" => {
						eprintln!("stop requested, exiting...");
						return;
					}
					Polled::Action(token) => {
						eprintln!("action: {token}");
						seen.push(token);
						channel.set_status(seen.clone());
					}
					Polled::Idle => eprintln!("idle"),
				}
			}
		}
		"put" | "status" => {
			let put = cmd == "put";
			let token = args.get(2).cloned().unwrap_or_else(|| "hello".into());
			let result = tokio::task::spawn_blocking(move || {
				let mut client = ControlClient::<Vec<String>>::connect(ADDR, KEY, Duration::from_secs(2))?;
				if put {
					client.put_action(&token, Duration::from_secs(5))?;
				}
				client.get_status()
			})
			.await;
			match result {
				Ok(Ok(seen)) => println!("{seen:?}"),
				Ok(Err(e)) => eprintln!("error: {e}"),
				Err(e) => eprintln!("error: {e}"),
			}
		}
		_ => {
			eprintln!("usage: mailbox <run|put [token]|status>");
		}
	}
}
