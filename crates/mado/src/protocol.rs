use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ProtocolError;

/// The four operations a connected peer may request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request<S> {
	PutAction { token: String, timeout_ms: u64 },
	GetAction { timeout_ms: u64 },
	GetStatus,
	SetStatus { snapshot: S },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response<S> {
	Accepted,
	Busy,
	Action { token: String },
	Idle,
	Status { snapshot: S },
	Error { message: String },
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
	Ok(serde_json::to_vec(msg)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
	Ok(serde_json::from_slice(bytes)?)
}
