//! Extension process supervision
//!
//! The supervisor owns the process registry and the per-extension error
//! slots. It starts processes, classifies their exits, schedules restarts
//! after crashes and stops processes with SIGTERM followed by SIGKILL once
//! the grace period has passed.

use lantern_config::{LanternConfig, RestartConfig};
use lantern_ipc::{WireCodec, CODEC_ENV, EXTENSION_ID_ENV, SOCKET_ENV};
use lantern_resilience::{ProcessShutdownManager, RestartBackoff};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, ExtensionError, RuntimeError, RuntimeResult};
use crate::error_extractor;
use crate::finder::ExtensionFinder;
use crate::identity::ExtensionId;
use crate::manifest::ExtensionManifest;
use crate::preferences::{preferences_snapshot, PreferenceStore};
use crate::process::{
    ExitOutcome, ExtensionProcess, LaunchSpec, ProcessEvent, ProcessEventSender,
};
use crate::timer::{TimerId, TimerKind, Timers};

/// Extra module search path for extension processes
pub const MODULE_PATH_ENV: &str = "LANTERN_MODULE_PATH";

/// `1` when extensions should log verbosely
pub const VERBOSE_ENV: &str = "VERBOSE";

/// Preference values with trigger keywords folded in, as compact JSON
pub const PREFERENCES_ENV: &str = "EXTENSION_PREFERENCES";

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Supervisor knobs, flattened from the configuration domains
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub socket_path: PathBuf,
    pub codec: WireCodec,
    pub host_api_version: String,
    pub interpreter: String,
    pub module_search_path: Vec<PathBuf>,
    pub host_namespace: String,
    pub verbose: bool,
    pub instant_exit_threshold: Duration,
    pub stop_grace_period: Duration,
    pub restart: RestartConfig,
}

impl SupervisorSettings {
    pub fn from_config(config: &LanternConfig) -> Self {
        Self {
            socket_path: config.runtime.socket_path.clone(),
            codec: config.runtime.codec,
            host_api_version: config.extensions.host_api_version.clone(),
            interpreter: config.extensions.interpreter.clone(),
            module_search_path: config.extensions.module_search_path.clone(),
            host_namespace: config.extensions.host_namespace.clone(),
            verbose: config.extensions.verbose,
            instant_exit_threshold: config.runtime.instant_exit_threshold,
            stop_grace_period: config.runtime.stop_grace_period,
            restart: config.runtime.restart.clone(),
        }
    }

    fn restart_backoff(&self) -> RestartBackoff {
        RestartBackoff::exponential(
            self.restart.initial_delay,
            self.restart.max_delay,
            self.restart.multiplier,
            self.restart.reset_after,
            self.restart.jitter,
        )
    }
}

/// A process that was sent SIGTERM and may still need a SIGKILL
#[derive(Debug, Clone)]
struct StoppingProcess {
    ext_id: ExtensionId,
    pid: u32,
}

#[derive(Debug)]
pub struct Supervisor {
    settings: SupervisorSettings,
    finder: ExtensionFinder,
    processes: HashMap<ExtensionId, ExtensionProcess>,
    stopping: HashMap<u64, StoppingProcess>,
    errors: HashMap<ExtensionId, ExtensionError>,
    backoffs: HashMap<ExtensionId, RestartBackoff>,
    pending_restarts: HashMap<ExtensionId, TimerId>,
    next_generation: u64,
    process_tx: ProcessEventSender,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        finder: ExtensionFinder,
        process_tx: ProcessEventSender,
    ) -> Self {
        Self {
            settings,
            finder,
            processes: HashMap::new(),
            stopping: HashMap::new(),
            errors: HashMap::new(),
            backoffs: HashMap::new(),
            pending_restarts: HashMap::new(),
            next_generation: 1,
            process_tx,
        }
    }

    /// Locate an extension and load its validated, compatible manifest
    pub fn load_extension(
        &self,
        ext_id: &ExtensionId,
    ) -> RuntimeResult<(PathBuf, ExtensionManifest)> {
        let dir = self
            .finder
            .locate(ext_id)
            .ok_or_else(|| RuntimeError::ExtensionNotFound(ext_id.clone()))?;
        let manifest = ExtensionManifest::load(&dir)?;
        manifest.validate()?;
        manifest.check_compatibility(&self.settings.host_api_version)?;
        Ok((dir, manifest))
    }

    /// Start an extension on request; previous crashes are forgotten
    pub fn run(
        &mut self,
        ext_id: &ExtensionId,
        prefs: &dyn PreferenceStore,
        timers: &mut Timers<TimerKind>,
    ) -> RuntimeResult<()> {
        if self.processes.contains_key(ext_id) {
            return Err(RuntimeError::AlreadyRunning(ext_id.clone()));
        }
        self.cancel_restart(ext_id, timers);
        if let Some(backoff) = self.backoffs.get_mut(ext_id) {
            backoff.reset();
        }
        self.launch(ext_id, prefs)
    }

    fn launch(&mut self, ext_id: &ExtensionId, prefs: &dyn PreferenceStore) -> RuntimeResult<()> {
        if self.processes.contains_key(ext_id) {
            return Err(RuntimeError::AlreadyRunning(ext_id.clone()));
        }

        let (dir, manifest) = match self.load_extension(ext_id) {
            Ok(found) => found,
            Err(RuntimeError::Manifest(err)) => {
                error!("Not starting extension {}: {}", ext_id, err);
                self.set_error(ext_id.clone(), ExtensionError::from(&err));
                return Err(err.into());
            }
            Err(err) => return Err(err),
        };
        self.errors.remove(ext_id);

        let spec = LaunchSpec {
            ext_id: ext_id.clone(),
            argv: manifest.command_for(&dir, &self.settings.interpreter),
            env: self.environment(ext_id, &manifest, prefs),
            working_dir: dir,
        };
        let generation = self.next_generation;
        self.next_generation += 1;

        match ExtensionProcess::spawn(spec, generation, self.process_tx.clone()) {
            Ok(process) => {
                info!("Started extension {} (pid {})", ext_id, process.pid);
                self.processes.insert(ext_id.clone(), process);
                Ok(())
            }
            Err(err) => {
                error!("{}", err);
                self.set_error(
                    ext_id.clone(),
                    ExtensionError::new(ErrorKind::ExitedInstantly, err.to_string()),
                );
                Err(err)
            }
        }
    }

    fn environment(
        &self,
        ext_id: &ExtensionId,
        manifest: &ExtensionManifest,
        prefs: &dyn PreferenceStore,
    ) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        );
        if let Ok(home) = std::env::var("HOME") {
            env.insert("HOME".to_string(), home);
        }
        let module_path = std::env::join_paths(&self.settings.module_search_path)
            .map(|joined| joined.to_string_lossy().into_owned())
            .unwrap_or_default();
        env.insert(MODULE_PATH_ENV.to_string(), module_path);
        env.insert(
            VERBOSE_ENV.to_string(),
            if self.settings.verbose { "1" } else { "0" }.to_string(),
        );
        env.insert(
            PREFERENCES_ENV.to_string(),
            JsonValue::Object(preferences_snapshot(prefs, ext_id, manifest)).to_string(),
        );
        env.insert(
            SOCKET_ENV.to_string(),
            self.settings.socket_path.to_string_lossy().into_owned(),
        );
        env.insert(EXTENSION_ID_ENV.to_string(), ext_id.to_string());
        env.insert(CODEC_ENV.to_string(), self.settings.codec.as_str().to_string());
        env
    }

    /// SIGTERM now, SIGKILL after the grace period
    pub fn stop(
        &mut self,
        ext_id: &ExtensionId,
        timers: &mut Timers<TimerKind>,
    ) -> RuntimeResult<()> {
        self.cancel_restart(ext_id, timers);
        let process = self
            .processes
            .remove(ext_id)
            .ok_or_else(|| RuntimeError::NotRunning(ext_id.clone()))?;

        info!("Terminating extension {} (pid {})", ext_id, process.pid);
        if let Err(e) = ProcessShutdownManager::terminate(process.pid) {
            warn!("Failed to terminate extension {}: {}", ext_id, e);
        }
        self.stopping.insert(
            process.generation,
            StoppingProcess {
                ext_id: ext_id.clone(),
                pid: process.pid,
            },
        );
        timers.arm(
            self.settings.stop_grace_period,
            TimerKind::Kill {
                generation: process.generation,
            },
        );
        Ok(())
    }

    /// Grace period of a stopped process is over
    pub fn on_kill_timer(&mut self, generation: u64) {
        let Some(stopping) = self.stopping.remove(&generation) else {
            return;
        };
        info!(
            "Extension {} still running, sending SIGKILL to {}",
            stopping.ext_id, stopping.pid
        );
        if let Err(e) = ProcessShutdownManager::kill(stopping.pid) {
            warn!("Failed to kill extension {}: {}", stopping.ext_id, e);
        }
    }

    /// Apply a stderr line or an exit reported by a watcher task
    pub fn on_process_event(&mut self, event: ProcessEvent, timers: &mut Timers<TimerKind>) {
        match event {
            ProcessEvent::StderrLine {
                ext_id,
                generation,
                line,
            } => {
                info!("[{}] {}", ext_id, line);
                if let Some(process) = self.processes.get_mut(&ext_id) {
                    if process.generation == generation {
                        process.record_stderr(line);
                    }
                }
            }
            ProcessEvent::Exited {
                ext_id,
                generation,
                outcome,
                exited_at,
            } => self.on_exit(ext_id, generation, outcome, exited_at, timers),
        }
    }

    fn on_exit(
        &mut self,
        ext_id: ExtensionId,
        generation: u64,
        outcome: ExitOutcome,
        exited_at: Instant,
        timers: &mut Timers<TimerKind>,
    ) {
        if self.stopping.remove(&generation).is_some() {
            info!("Extension {} was stopped", ext_id);
            return;
        }
        let current = self
            .processes
            .get(&ext_id)
            .is_some_and(|process| process.generation == generation);
        if !current {
            debug!(
                "Ignoring exit of superseded extension process {} (generation {})",
                ext_id, generation
            );
            return;
        }
        let Some(process) = self.processes.remove(&ext_id) else {
            return;
        };

        let uptime = process.uptime_at(exited_at);
        let stderr = process.recent_stderr();
        let describe = |fallback: String| if stderr.is_empty() { fallback } else { stderr.clone() };

        let record = match outcome {
            ExitOutcome::Signal(signal) => ExtensionError::new(
                ErrorKind::Terminated,
                describe(format!("Extension {} was terminated by signal {}", ext_id, signal)),
            ),
            ExitOutcome::WaitFailed(message) => ExtensionError::new(ErrorKind::Terminated, message),
            ExitOutcome::Code(code) if uptime < self.settings.instant_exit_threshold => {
                match error_extractor::classify(&stderr, &self.settings.host_namespace) {
                    Some((kind, message)) => ExtensionError::new(kind, message),
                    None => ExtensionError::new(
                        ErrorKind::ExitedInstantly,
                        describe(format!(
                            "Extension {} exited with code {} before it could start",
                            ext_id, code
                        )),
                    ),
                }
            }
            ExitOutcome::Code(code) => ExtensionError::new(
                ErrorKind::ExitedAfterRunning,
                describe(format!(
                    "Extension {} exited with code {} after {:.1} seconds",
                    ext_id,
                    code,
                    uptime.as_secs_f64()
                )),
            ),
        };

        error!("Extension {} failed ({}): {}", ext_id, record.kind, record.message);
        let restart = record.kind == ErrorKind::ExitedAfterRunning;
        self.set_error(ext_id.clone(), record);

        if restart {
            let settings = &self.settings;
            let delay = self
                .backoffs
                .entry(ext_id.clone())
                .or_insert_with(|| settings.restart_backoff())
                .next_delay(uptime);
            info!("Restarting extension {} in {:?}", ext_id, delay);
            let timer = timers.arm(delay, TimerKind::Restart(ext_id.clone()));
            self.pending_restarts.insert(ext_id, timer);
        }
    }

    /// Restart delay of a crashed extension is over
    pub fn on_restart_timer(
        &mut self,
        ext_id: &ExtensionId,
        timer: TimerId,
        prefs: &dyn PreferenceStore,
    ) {
        if self.pending_restarts.get(ext_id) != Some(&timer) {
            return;
        }
        self.pending_restarts.remove(ext_id);
        match self.launch(ext_id, prefs) {
            Ok(()) => {}
            Err(RuntimeError::AlreadyRunning(_)) => {
                debug!("Extension {} was started before its restart was due", ext_id)
            }
            Err(e) => warn!("Failed to restart extension {}: {}", ext_id, e),
        }
    }

    fn cancel_restart(&mut self, ext_id: &ExtensionId, timers: &mut Timers<TimerKind>) {
        if let Some(timer) = self.pending_restarts.remove(ext_id) {
            debug!("Cancelling pending restart of extension {}", ext_id);
            timers.cancel(timer);
        }
    }

    /// Start every installed extension without a recorded error
    pub fn run_all(
        &mut self,
        prefs: &dyn PreferenceStore,
        timers: &mut Timers<TimerKind>,
    ) -> Vec<ExtensionId> {
        let mut started = Vec::new();
        for ext_id in self.finder.iterate().into_keys() {
            if self.errors.contains_key(&ext_id) || self.processes.contains_key(&ext_id) {
                continue;
            }
            match self.run(&ext_id, prefs, timers) {
                Ok(()) => started.push(ext_id),
                Err(e) => warn!("Failed to start extension {}: {}", ext_id, e),
            }
        }
        started
    }

    /// Stop every running extension; returns how many were stopped
    pub fn stop_all(&mut self, timers: &mut Timers<TimerKind>) -> usize {
        let running: Vec<ExtensionId> = self.processes.keys().cloned().collect();
        for ext_id in &running {
            if let Err(e) = self.stop(ext_id, timers) {
                warn!("Failed to stop extension {}: {}", ext_id, e);
            }
        }
        let pending: Vec<ExtensionId> = self.pending_restarts.keys().cloned().collect();
        for ext_id in &pending {
            self.cancel_restart(ext_id, timers);
        }
        running.len()
    }

    pub fn get_error(&self, ext_id: &ExtensionId) -> Option<&ExtensionError> {
        self.errors.get(ext_id)
    }

    /// Record an error; the last write wins
    pub fn set_error(&mut self, ext_id: ExtensionId, error: ExtensionError) {
        self.errors.insert(ext_id, error);
    }

    pub fn clear_error(&mut self, ext_id: &ExtensionId) -> Option<ExtensionError> {
        self.errors.remove(ext_id)
    }

    pub fn is_running(&self, ext_id: &ExtensionId) -> bool {
        self.processes.contains_key(ext_id)
    }

    /// Running extensions with their uptime
    pub fn running(&self) -> BTreeMap<ExtensionId, Duration> {
        self.processes
            .iter()
            .map(|(id, process)| (id.clone(), process.uptime()))
            .collect()
    }

    pub fn has_restart_pending(&self, ext_id: &ExtensionId) -> bool {
        self.pending_restarts.contains_key(ext_id)
    }

    /// Whether any stopped process may still need a SIGKILL
    pub fn has_stopping(&self) -> bool {
        !self.stopping.is_empty()
    }
}
