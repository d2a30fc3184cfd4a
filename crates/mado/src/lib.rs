//! # mado
//!
//! Daemon lifecycle and control channel toolkit.
//!
//! - [`Daemon`] detaches a process from its session and owns its lock file.
//! - [`LockFile`] is the pid-file exclusivity primitive, shared with
//!   supervised services.
//! - [`ControlChannel`] holds the two capacity-1 mailboxes (actions in,
//!   status out); [`server::serve`] exposes them over authenticated TCP and
//!   [`ControlClient`] talks to them from another process.

pub mod auth;
pub mod channel;
pub mod client;
pub mod daemon;
pub mod error;
pub mod frame;
pub mod lockfile;
pub mod paths;
pub mod protocol;
pub mod server;

pub use channel::{ControlChannel, Polled};
pub use client::ControlClient;
pub use daemon::{detach, Daemon, DaemonGuard};
pub use error::{ChannelError, ClientError, DaemonError, LockError, ProtocolError};
pub use lockfile::LockFile;
pub use paths::DaemonPaths;
