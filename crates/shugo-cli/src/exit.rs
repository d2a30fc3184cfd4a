use kanri::SupervisorError;
use mado::ClientError;

pub const SUCCESS: u8 = 0;
pub const FAILURE: u8 = 1;
/// clap exits with this on bad arguments; we reuse it for bad selections.
pub const USAGE: u8 = 2;
pub const UNREACHABLE: u8 = 3;

/// Exit code for an error bubbled up to `main`.
pub fn code_for(error: &anyhow::Error) -> u8 {
	if let Some(e) = error.downcast_ref::<SupervisorError>() {
		return match e {
			SupervisorError::Channel(ClientError::Unreachable { .. }) => UNREACHABLE,
			SupervisorError::Configuration(_) => USAGE,
			_ => FAILURE,
		};
	}
	if let Some(ClientError::Unreachable { .. }) = error.downcast_ref::<ClientError>() {
		return UNREACHABLE;
	}
	FAILURE
}
