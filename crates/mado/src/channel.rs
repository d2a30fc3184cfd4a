use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};

use crate::error::ChannelError;

/// Result of waiting on the action mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled {
	Action(String),
	/// Nothing arrived within the timeout. This is the heartbeat tick.
	Idle,
}

/// The two mailboxes shared between the supervisor and remote clients.
///
/// The action mailbox holds at most one token: a put waits until the single
/// consumer has taken the previous one. The status mailbox always holds
/// exactly one snapshot, replaced whole.
pub struct ControlChannel<S> {
	actions: mpsc::Sender<String>,
	inbox: Mutex<mpsc::Receiver<String>>,
	status: watch::Sender<S>,
}

impl<S: Clone> ControlChannel<S> {
	pub fn new(initial: S) -> Self {
		let (actions, inbox) = mpsc::channel(1);
		let (status, _) = watch::channel(initial);
		Self {
			actions,
			inbox: Mutex::new(inbox),
			status,
		}
	}

	/// Waits up to `timeout` for room in the action mailbox.
	pub async fn put_action(&self, token: String, timeout: Duration) -> Result<(), ChannelError> {
		match tokio::time::timeout(timeout, self.actions.send(token)).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(_)) => Err(ChannelError::Closed),
			Err(_) => Err(ChannelError::Busy),
		}
	}

	/// Waits up to `timeout` for the next action.
	pub async fn get_action(&self, timeout: Duration) -> Polled {
		let next = async {
			let mut inbox = self.inbox.lock().await;
			inbox.recv().await
		};
		// `recv` is cancel safe: a timed-out wait never loses a token.
		match tokio::time::timeout(timeout, next).await {
			Ok(Some(token)) => Polled::Action(token),
			// The sender lives in `self`, so the mailbox cannot close under us.
			Ok(None) | Err(_) => Polled::Idle,
		}
	}

	/// The most recent snapshot; it stays in place for the next reader.
	pub fn get_status(&self) -> S {
		self.status.borrow().clone()
	}

	pub fn set_status(&self, snapshot: S) {
		self.status.send_replace(snapshot);
	}
}
