use std::time::Duration;

use mado::ControlClient;

use crate::error::SupervisorError;
use crate::types::{Action, StatusSnapshot};

/// Client-side handle on a running supervisor.
pub struct Controller {
	client: ControlClient<StatusSnapshot>,
	timeout: Duration,
}

impl Controller {
	/// `timeout` bounds both the connect and every `put_action` wait.
	pub fn connect(addr: &str, key: &[u8], timeout: Duration) -> Result<Self, SupervisorError> {
		let client = ControlClient::connect(addr, key, timeout)?;
		Ok(Self { client, timeout })
	}

	/// Queue `action` and return as soon as the mailbox accepts it.
	pub fn request(&mut self, action: &Action) -> Result<(), SupervisorError> {
		tracing::debug!(%action, "sending action");
		self.client.put_action(action.as_str(), self.timeout)?;
		Ok(())
	}

	/// Ask for a fresh snapshot and read it back.
	///
	/// The first flush can only be queued once `status` has been taken, and
	/// the second only once the first has, which is after `status` finished.
	pub fn status(&mut self) -> Result<StatusSnapshot, SupervisorError> {
		self.request(&Action::Status)?;
		self.request(&Action::Flush)?;
		self.request(&Action::Flush)?;
		Ok(self.client.get_status()?)
	}
}
