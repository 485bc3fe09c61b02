//! Resilience patterns for Lantern
//!
//! This crate provides the restart backoff used after extension crashes and
//! escalating termination of child processes.

pub mod backoff;
pub mod restart;
pub mod shutdown;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use restart::RestartBackoff;
pub use shutdown::{ProcessShutdownManager, ShutdownError, SignalOutcome};
