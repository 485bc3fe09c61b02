//! Tracing subscriber setup for Lantern
//!
//! Runtime crates log through `tracing`; the IPC crate logs through the `log`
//! facade, which the subscriber installed here also collects.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
pub use tracing_appender::non_blocking::WorkerGuard;
