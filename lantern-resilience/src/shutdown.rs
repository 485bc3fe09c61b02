//! Escalating process termination
//!
//! Supervisors stop a child with SIGTERM, wait out a grace period on their
//! own timer, then SIGKILL it if it is still around. A process that is
//! already gone is not an error at either step.

use log::{debug, info, warn};
use thiserror::Error;

/// Shutdown errors
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Failed to signal process {pid}: {message}")]
    SignalFailed { pid: u32, message: String },

    #[error("Process signalling is not supported on this platform")]
    Unsupported,
}

/// What happened when a signal was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process had already exited
    AlreadyGone,
}

/// Signals child processes by pid
pub struct ProcessShutdownManager;

impl ProcessShutdownManager {
    /// Ask a process to terminate (SIGTERM)
    pub fn terminate(pid: u32) -> Result<SignalOutcome, ShutdownError> {
        info!("Initiating graceful shutdown for process {}", pid);
        Self::send(pid, TerminationSignal::Terminate)
    }

    /// Force a process to exit (SIGKILL)
    pub fn kill(pid: u32) -> Result<SignalOutcome, ShutdownError> {
        info!("Forcing termination of process {}", pid);
        Self::send(pid, TerminationSignal::Kill)
    }

    #[cfg(unix)]
    fn send(pid: u32, kind: TerminationSignal) -> Result<SignalOutcome, ShutdownError> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ShutdownError::SignalFailed {
            pid,
            message: "pid out of range".to_string(),
        })?;
        let sig = match kind {
            TerminationSignal::Terminate => Signal::SIGTERM,
            TerminationSignal::Kill => Signal::SIGKILL,
        };

        match signal::kill(Pid::from_raw(raw), sig) {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => {
                debug!("Process {} already exited, {:?} not needed", pid, sig);
                Ok(SignalOutcome::AlreadyGone)
            }
            Err(e) => {
                warn!("Failed to send {:?} to process {}: {}", sig, pid, e);
                Err(ShutdownError::SignalFailed {
                    pid,
                    message: e.to_string(),
                })
            }
        }
    }

    #[cfg(not(unix))]
    fn send(_pid: u32, _kind: TerminationSignal) -> Result<SignalOutcome, ShutdownError> {
        Err(ShutdownError::Unsupported)
    }
}

#[derive(Debug, Clone, Copy)]
enum TerminationSignal {
    Terminate,
    Kill,
}
