//! Extension child processes
//!
//! A process is spawned with an explicit environment and a piped stderr. One
//! watcher task per process forwards stderr lines and finally the exit
//! status to the runtime loop; stderr lines of a process always arrive
//! before its exit.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::identity::ExtensionId;

/// Number of stderr lines kept for exit classification
pub const STDERR_TAIL: usize = 1;

/// How long to keep reading stderr after the process exited
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Everything needed to start one extension process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub ext_id: ExtensionId,
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    /// The complete environment; nothing is inherited from the host
    pub env: HashMap<String, String>,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
    WaitFailed(String),
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signal(signal);
            }
        }
        ExitOutcome::Code(status.code().unwrap_or(-1))
    }
}

/// Posted by process watcher tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    StderrLine {
        ext_id: ExtensionId,
        generation: u64,
        line: String,
    },
    Exited {
        ext_id: ExtensionId,
        generation: u64,
        outcome: ExitOutcome,
        /// When `wait` returned, before stderr was drained
        exited_at: Instant,
    },
}

pub type ProcessEventSender = mpsc::UnboundedSender<ProcessEvent>;
pub type ProcessEventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;

/// A running extension process
#[derive(Debug)]
pub struct ExtensionProcess {
    pub ext_id: ExtensionId,
    pub pid: u32,
    pub started_at: Instant,
    /// Distinguishes this spawn from earlier and later ones of the same id
    pub generation: u64,
    recent_stderr: VecDeque<String>,
}

impl ExtensionProcess {
    /// Start the process and its watcher task
    pub fn spawn(
        spec: LaunchSpec,
        generation: u64,
        events: ProcessEventSender,
    ) -> RuntimeResult<Self> {
        let spawn_error = |message: String| RuntimeError::Spawn {
            ext_id: spec.ext_id.clone(),
            message,
        };

        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| spawn_error("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(&spec.env)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(format!("{}: {}", program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| spawn_error("process exited before its pid was read".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("failed to capture stderr".to_string()))?;

        debug!(
            "Launched extension {} (pid {}, generation {}): {:?}",
            spec.ext_id, pid, generation, spec.argv
        );

        tokio::spawn(watch(
            spec.ext_id.clone(),
            generation,
            child,
            BufReader::new(stderr).lines(),
            events,
        ));

        Ok(Self {
            ext_id: spec.ext_id,
            pid,
            started_at: Instant::now(),
            generation,
            recent_stderr: VecDeque::with_capacity(STDERR_TAIL),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// How long the process ran if it ended at `exited_at`
    pub fn uptime_at(&self, exited_at: Instant) -> Duration {
        exited_at.saturating_duration_since(self.started_at)
    }

    /// Remember a stderr line, dropping the oldest beyond the tail size
    pub fn record_stderr(&mut self, line: String) {
        if self.recent_stderr.len() == STDERR_TAIL {
            self.recent_stderr.pop_front();
        }
        self.recent_stderr.push_back(line);
    }

    pub fn recent_stderr(&self) -> String {
        self.recent_stderr
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

async fn watch(
    ext_id: ExtensionId,
    generation: u64,
    mut child: Child,
    mut stderr: Lines<BufReader<ChildStderr>>,
    events: ProcessEventSender,
) {
    let forward = |line: String| {
        let _ = events.send(ProcessEvent::StderrLine {
            ext_id: ext_id.clone(),
            generation,
            line,
        });
    };

    let mut stderr_open = true;
    let status = loop {
        tokio::select! {
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => forward(line),
                Ok(None) => stderr_open = false,
                Err(e) => {
                    warn!("Failed to read stderr of extension {}: {}", ext_id, e);
                    stderr_open = false;
                }
            },
            status = child.wait() => break status,
        }
    };
    let exited_at = Instant::now();

    // Lines still buffered in the pipe belong before the exit event
    if stderr_open {
        let drain = async {
            while let Ok(Some(line)) = stderr.next_line().await {
                forward(line);
            }
        };
        if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("Stopped draining stderr of extension {}", ext_id);
        }
    }

    let outcome = match status {
        Ok(status) => ExitOutcome::from_status(status),
        Err(e) => ExitOutcome::WaitFailed(e.to_string()),
    };
    debug!("Extension {} (generation {}) exited: {:?}", ext_id, generation, outcome);
    let _ = events.send(ProcessEvent::Exited {
        ext_id,
        generation,
        outcome,
        exited_at,
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> LaunchSpec {
        LaunchSpec {
            ext_id: ExtensionId::new("demo"),
            argv: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            working_dir: std::env::temp_dir(),
            env: HashMap::from([
                ("PATH".to_string(), "/usr/bin:/bin".to_string()),
                ("GREETING".to_string(), "hello".to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_stderr_lines_precede_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let process = ExtensionProcess::spawn(
            shell("echo one >&2; echo \"$GREETING\" >&2; exit 3"),
            7,
            tx,
        )
        .unwrap();
        assert!(process.pid > 0);

        let mut lines = Vec::new();
        let outcome = loop {
            match rx.recv().await.unwrap() {
                ProcessEvent::StderrLine { line, generation, .. } => {
                    assert_eq!(generation, 7);
                    lines.push(line);
                }
                ProcessEvent::Exited { outcome, .. } => break outcome,
            }
        };

        assert_eq!(lines, vec!["one".to_string(), "hello".to_string()]);
        assert_eq!(outcome, ExitOutcome::Code(3));
    }

    #[tokio::test]
    async fn test_exit_time_excludes_stderr_drain() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // the background sleep keeps stderr open after the shell exits
        let process = ExtensionProcess::spawn(shell("(sleep 3) & sleep 0.1; exit 1"), 1, tx).unwrap();

        let exited_at = loop {
            if let ProcessEvent::Exited { exited_at, .. } = rx.recv().await.unwrap() {
                break exited_at;
            }
        };
        assert!(process.uptime() >= STDERR_DRAIN_TIMEOUT);
        assert!(process.uptime_at(exited_at) < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_signal_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let process = ExtensionProcess::spawn(shell("kill -TERM $$; sleep 5"), 1, tx).unwrap();

        let outcome = loop {
            if let ProcessEvent::Exited { outcome, .. } = rx.recv().await.unwrap() {
                break outcome;
            }
        };
        assert_eq!(outcome, ExitOutcome::Signal(15));
        assert!(process.uptime() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_spawn_failures() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut spec = shell("true");
        spec.argv = vec!["/nonexistent/lantern-extension".to_string()];
        assert!(matches!(
            ExtensionProcess::spawn(spec, 1, tx.clone()),
            Err(RuntimeError::Spawn { .. })
        ));

        let mut spec = shell("true");
        spec.argv.clear();
        assert!(matches!(
            ExtensionProcess::spawn(spec, 2, tx),
            Err(RuntimeError::Spawn { .. })
        ));
    }

    #[test]
    fn test_stderr_tail_keeps_last_line() {
        let mut process = ExtensionProcess {
            ext_id: ExtensionId::new("demo"),
            pid: 1,
            started_at: Instant::now(),
            generation: 1,
            recent_stderr: VecDeque::new(),
        };
        process.record_stderr("first".to_string());
        process.record_stderr("second".to_string());
        assert_eq!(process.recent_stderr(), "second");
    }
}
