use std::io;
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::auth;
use crate::error::ClientError;
use crate::frame;
use crate::protocol::{self, Request, Response};

/// Extra time a reply may take beyond the wait the server was asked to do.
const REPLY_GRACE: Duration = Duration::from_secs(5);

/// Synchronous client for a daemon's control channel.
///
/// Generic over the status snapshot type — it just needs `Serialize` and
/// `DeserializeOwned`.
pub struct ControlClient<S> {
	stream: TcpStream,
	_phantom: PhantomData<S>,
}

impl<S> ControlClient<S>
where
	S: Serialize + DeserializeOwned,
{
	/// Connect and authenticate with `key`.
	///
	/// Returns `Err(ClientError::Unreachable)` when nothing accepts the
	/// connection within `timeout`; the caller should treat that as "daemon is
	/// down" rather than retry.
	pub fn connect(addr: &str, key: &[u8], timeout: Duration) -> Result<Self, ClientError> {
		let unreachable = |source: io::Error| ClientError::Unreachable {
			addr: addr.to_string(),
			source,
		};

		let candidates: Vec<SocketAddr> = addr.to_socket_addrs().map_err(unreachable)?.collect();
		let mut last_err =
			io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing");
		let mut stream = None;
		for candidate in candidates {
			match TcpStream::connect_timeout(&candidate, timeout) {
				Ok(s) => {
					stream = Some(s);
					break;
				}
				Err(e) => last_err = e,
			}
		}
		let mut stream = stream.ok_or_else(|| unreachable(last_err))?;

		stream.set_nodelay(true)?;
		stream.set_read_timeout(Some(crate::server::HANDSHAKE_TIMEOUT + REPLY_GRACE))?;
		auth::connect(&mut stream, key)?;
		tracing::debug!("connected to daemon at {}", addr);

		Ok(Self {
			stream,
			_phantom: PhantomData,
		})
	}

	/// Put `token` on the action mailbox, waiting up to `timeout` for room.
	/// `ClientError::Busy` means the wait expired; it is safe to retry.
	pub fn put_action(&mut self, token: &str, timeout: Duration) -> Result<(), ClientError> {
		let request = Request::PutAction {
			token: token.to_string(),
			timeout_ms: millis(timeout),
		};
		match self.call(&request, timeout)? {
			Response::Accepted => Ok(()),
			Response::Busy => Err(ClientError::Busy),
			other => Err(unexpected(other)),
		}
	}

	/// Take the next action, or `None` when the mailbox stayed empty.
	pub fn get_action(&mut self, timeout: Duration) -> Result<Option<String>, ClientError> {
		let request = Request::GetAction {
			timeout_ms: millis(timeout),
		};
		match self.call(&request, timeout)? {
			Response::Action { token } => Ok(Some(token)),
			Response::Idle => Ok(None),
			other => Err(unexpected(other)),
		}
	}

	pub fn get_status(&mut self) -> Result<S, ClientError> {
		match self.call(&Request::GetStatus, Duration::ZERO)? {
			Response::Status { snapshot } => Ok(snapshot),
			other => Err(unexpected(other)),
		}
	}

	pub fn set_status(&mut self, snapshot: S) -> Result<(), ClientError> {
		match self.call(&Request::SetStatus { snapshot }, Duration::ZERO)? {
			Response::Accepted => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	fn call(&mut self, request: &Request<S>, wait: Duration) -> Result<Response<S>, ClientError> {
		self.stream.set_read_timeout(Some(reply_timeout(wait)))?;
		let data = protocol::encode(request)?;
		frame::write_frame(&mut self.stream, &data)?;
		let reply = frame::read_frame(&mut self.stream)?;
		Ok(protocol::decode(&reply)?)
	}
}

/// Read timeout for a call whose server side may wait up to `wait`.
fn reply_timeout(wait: Duration) -> Duration {
	wait.saturating_add(REPLY_GRACE)
}

fn millis(d: Duration) -> u64 {
	u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn unexpected<S>(response: Response<S>) -> ClientError {
	match response {
		Response::Error { message } => ClientError::Remote(message),
		Response::Accepted => ClientError::Protocol("unexpected ACCEPTED".into()),
		Response::Busy => ClientError::Protocol("unexpected BUSY".into()),
		Response::Action { .. } => ClientError::Protocol("unexpected ACTION".into()),
		Response::Idle => ClientError::Protocol("unexpected IDLE".into()),
		Response::Status { .. } => ClientError::Protocol("unexpected STATUS".into()),
	}
}
