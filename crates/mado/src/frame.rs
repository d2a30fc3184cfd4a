//! Length-prefixed frames: a 4-byte big-endian length followed by the payload.
//!
//! The blocking half is used by the client, the async half by the server.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

fn check_len(len: usize) -> Result<(), ProtocolError> {
	if len > MAX_FRAME_LEN {
		return Err(ProtocolError::FrameTooLarge(len));
	}
	Ok(())
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError> {
	check_len(payload.len())?;
	writer.write_all(&(payload.len() as u32).to_be_bytes())?;
	writer.write_all(payload)?;
	writer.flush()?;
	Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
	let mut header = [0u8; 4];
	reader.read_exact(&mut header)?;
	let len = u32::from_be_bytes(header) as usize;
	check_len(len)?;

	let mut payload = vec![0u8; len];
	reader.read_exact(&mut payload)?;
	Ok(payload)
}

pub async fn write_frame_async<W: AsyncWrite + Unpin>(
	writer: &mut W,
	payload: &[u8],
) -> Result<(), ProtocolError> {
	check_len(payload.len())?;
	writer.write_u32(payload.len() as u32).await?;
	writer.write_all(payload).await?;
	writer.flush().await?;
	Ok(())
}

/// Returns `Ok(None)` on a clean end of stream before a header.
pub async fn read_frame_async<R: AsyncRead + Unpin>(
	reader: &mut R,
) -> Result<Option<Vec<u8>>, ProtocolError> {
	let len = match reader.read_u32().await {
		Ok(len) => len as usize,
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e.into()),
	};
	check_len(len)?;

	let mut payload = vec![0u8; len];
	reader.read_exact(&mut payload).await?;
	Ok(Some(payload))
}
