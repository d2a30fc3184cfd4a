use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::net::{TcpListener, TcpStream};

use crate::auth;
use crate::channel::{ControlChannel, Polled};
use crate::error::{ChannelError, ProtocolError};
use crate::frame;
use crate::protocol::{self, Request, Response};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept connections forever, exposing `channel` to authenticated peers.
pub async fn serve<S>(listener: TcpListener, channel: Arc<ControlChannel<S>>, key: Arc<[u8]>)
where
	S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
	if let Ok(addr) = listener.local_addr() {
		tracing::info!("control channel listening on {}", addr);
	}

	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(s) => s,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				continue;
			}
		};

		let channel = Arc::clone(&channel);
		let key = Arc::clone(&key);
		tokio::spawn(async move {
			if let Err(e) = handle_connection(stream, peer, channel, key).await {
				tracing::warn!("connection from {} closed: {}", peer, e);
			}
		});
	}
}

async fn handle_connection<S>(
	mut stream: TcpStream,
	peer: SocketAddr,
	channel: Arc<ControlChannel<S>>,
	key: Arc<[u8]>,
) -> Result<(), ProtocolError>
where
	S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
	match tokio::time::timeout(HANDSHAKE_TIMEOUT, auth::accept(&mut stream, &key)).await {
		Ok(result) => result?,
		Err(_) => return Err(ProtocolError::HandshakeTimeout),
	}
	tracing::debug!("client {} authenticated", peer);

	while let Some(payload) = frame::read_frame_async(&mut stream).await? {
		let response = match protocol::decode::<Request<S>>(&payload) {
			Ok(request) => handle_request(&channel, request).await,
			Err(e) => {
				tracing::warn!("invalid request from {}: {}", peer, e);
				Response::Error {
					message: format!("invalid request: {}", e),
				}
			}
		};

		let data = protocol::encode(&response)?;
		frame::write_frame_async(&mut stream, &data).await?;
	}

	tracing::debug!("client {} disconnected", peer);
	Ok(())
}

async fn handle_request<S: Clone>(channel: &ControlChannel<S>, request: Request<S>) -> Response<S> {
	match request {
		Request::PutAction { token, timeout_ms } => {
			match channel
				.put_action(token, Duration::from_millis(timeout_ms))
				.await
			{
				Ok(()) => Response::Accepted,
				Err(ChannelError::Busy) => Response::Busy,
				Err(e) => Response::Error {
					message: e.to_string(),
				},
			}
		}
		Request::GetAction { timeout_ms } => {
			match channel.get_action(Duration::from_millis(timeout_ms)).await {
				Polled::Action(token) => Response::Action { token },
				Polled::Idle => Response::Idle,
			}
		}
		Request::GetStatus => Response::Status {
			snapshot: channel.get_status(),
		},
		Request::SetStatus { snapshot } => {
			channel.set_status(snapshot);
			Response::Accepted
		}
	}
}
