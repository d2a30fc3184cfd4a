//! Mutual challenge/response authentication over a shared secret.
//!
//! Each side sends `#CHALLENGE#` + 32 random bytes and expects
//! `HMAC-SHA256(key, challenge)` back, answered with `#WELCOME#` or
//! `#FAILURE#`. The server challenges first.

use std::io::{Read, Write};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProtocolError;
use crate::frame;

type HmacSha256 = Hmac<Sha256>;

pub const CHALLENGE: &[u8] = b"#CHALLENGE#";
pub const WELCOME: &[u8] = b"#WELCOME#";
pub const FAILURE: &[u8] = b"#FAILURE#";
const NONCE_LEN: usize = 32;

fn new_challenge() -> Vec<u8> {
	let nonce: [u8; NONCE_LEN] = rand::random();
	let mut msg = CHALLENGE.to_vec();
	msg.extend_from_slice(&nonce);
	msg
}

fn digest(key: &[u8], challenge: &[u8]) -> Result<Vec<u8>, ProtocolError> {
	let mut mac =
		HmacSha256::new_from_slice(key).map_err(|_| ProtocolError::AuthenticationFailed)?;
	mac.update(challenge);
	Ok(mac.finalize().into_bytes().to_vec())
}

fn verify(key: &[u8], challenge: &[u8], response: &[u8]) -> bool {
	let mut mac = match HmacSha256::new_from_slice(key) {
		Ok(mac) => mac,
		Err(_) => return false,
	};
	mac.update(challenge);
	mac.verify_slice(response).is_ok()
}

fn answer(key: &[u8], challenge: &[u8]) -> Result<Vec<u8>, ProtocolError> {
	if !challenge.starts_with(CHALLENGE) || challenge.len() != CHALLENGE.len() + NONCE_LEN {
		return Err(ProtocolError::AuthenticationFailed);
	}
	digest(key, challenge)
}

/// Server side of the handshake.
pub async fn accept<S>(stream: &mut S, key: &[u8]) -> Result<(), ProtocolError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let challenge = new_challenge();
	frame::write_frame_async(stream, &challenge).await?;
	let response = read_required(stream).await?;
	if !verify(key, &challenge, &response) {
		frame::write_frame_async(stream, FAILURE).await?;
		return Err(ProtocolError::AuthenticationFailed);
	}
	frame::write_frame_async(stream, WELCOME).await?;

	let theirs = read_required(stream).await?;
	let response = answer(key, &theirs)?;
	frame::write_frame_async(stream, &response).await?;
	match read_required(stream).await?.as_slice() {
		WELCOME => Ok(()),
		_ => Err(ProtocolError::AuthenticationFailed),
	}
}

async fn read_required<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, ProtocolError> {
	frame::read_frame_async(stream).await?.ok_or_else(|| {
		ProtocolError::Io(std::io::Error::new(
			std::io::ErrorKind::UnexpectedEof,
			"peer closed during handshake",
		))
	})
}

/// Client side of the handshake.
pub fn connect<S: Read + Write>(stream: &mut S, key: &[u8]) -> Result<(), ProtocolError> {
	let theirs = frame::read_frame(stream)?;
	let response = answer(key, &theirs)?;
	frame::write_frame(stream, &response)?;
	if frame::read_frame(stream)? != WELCOME {
		return Err(ProtocolError::AuthenticationFailed);
	}

	let challenge = new_challenge();
	frame::write_frame(stream, &challenge)?;
	let response = frame::read_frame(stream)?;
	if !verify(key, &challenge, &response) {
		frame::write_frame(stream, FAILURE)?;
		return Err(ProtocolError::AuthenticationFailed);
	}
	frame::write_frame(stream, WELCOME)?;
	Ok(())
}
