//! Shared pieces of the `shugod` and `shugoctl` binaries.

pub mod config;
pub mod exit;
pub mod logging;
pub mod render;
