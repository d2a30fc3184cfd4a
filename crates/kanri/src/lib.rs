//! # kanri
//!
//! Service supervisor toolkit.
//!
//! Start, monitor and restart named subprocesses, each guarded by a pid lock
//! file. Pairs with [`mado`] for daemon lifecycle and the control channel.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kanri::{Definitions, ServiceDefinition, Supervisor, SupervisorOptions, StatusSnapshot};
//! use mado::{ControlChannel, DaemonPaths};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut config = Definitions::new();
//! config.insert("web".into(), ServiceDefinition::new("python3 -m http.server", "/tmp"));
//!
//! let channel = Arc::new(ControlChannel::new(StatusSnapshot::new()));
//! let paths = DaemonPaths::new("myapp", "myappd");
//! let mut sup = Supervisor::new(config.clone(), SupervisorOptions::default(), paths, channel);
//!
//! sup.start_services(config).unwrap();
//! sup.run(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod remote;
pub mod supervisor;
pub mod types;

pub use config::ConfigSource;
pub use error::SupervisorError;
pub use process::ProcessHandle;
pub use remote::Controller;
pub use supervisor::{select_services, Supervisor, SupervisorOptions, APPLIED_HISTORY};
pub use types::*;
