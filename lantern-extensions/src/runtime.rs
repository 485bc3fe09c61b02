//! Extension runtime
//!
//! One task owns the registration server, the supervisor, the controllers,
//! the correlator and every timer. Everything else (acceptor, framers,
//! process watchers, timers, and the launcher through [`RuntimeHandle`])
//! only posts into the channels this loop drains, so no state is shared.

use lantern_config::LanternConfig;
use lantern_ipc::{
    ExtensionEvent, ExtensionMessage, FramerEvent, FramerEventReceiver, FramerEventSender,
    FramerId,
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::{Controller, ControllerRegistry};
use crate::correlator::{Correlator, UiEventReceiver};
use crate::error::{ExtensionError, RuntimeError, RuntimeResult};
use crate::finder::ExtensionFinder;
use crate::identity::ExtensionId;
use crate::preferences::{preferences_snapshot, PreferenceStore};
use crate::process::ProcessEventReceiver;
use crate::router::{route, Query};
use crate::server::{Connection, IncomingReceiver, IncomingSender, RegistrationServer, Subscriber};
use crate::supervisor::{Supervisor, SupervisorSettings};
use crate::timer::{TimerId, TimerKind, TimerReceiver, Timers};

/// Point-in-time view of the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeStatus {
    /// Socket the registration server listens on, if it is running
    pub socket_path: Option<PathBuf>,
    /// Running extension processes and their uptime
    pub running: BTreeMap<ExtensionId, Duration>,
    /// Extensions with a registered connection
    pub connected: Vec<ExtensionId>,
    pub pending_connections: usize,
}

/// Requests handled by the runtime loop
#[derive(Debug)]
enum RuntimeCommand {
    StartServer {
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    StopServer {
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    Run {
        ext_id: ExtensionId,
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    Stop {
        ext_id: ExtensionId,
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    Reload {
        ext_id: ExtensionId,
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    RunAll {
        reply: oneshot::Sender<Vec<ExtensionId>>,
    },
    StopAll {
        reply: oneshot::Sender<usize>,
    },
    GetError {
        ext_id: ExtensionId,
        reply: oneshot::Sender<Option<ExtensionError>>,
    },
    SetError {
        ext_id: ExtensionId,
        error: ExtensionError,
        reply: oneshot::Sender<()>,
    },
    IsRunning {
        ext_id: ExtensionId,
        reply: oneshot::Sender<bool>,
    },
    HandleQuery {
        text: String,
        reply: oneshot::Sender<Option<ExtensionId>>,
    },
    QueryChanged {
        reply: oneshot::Sender<()>,
    },
    LaunchTrigger {
        ext_id: ExtensionId,
        trigger_id: String,
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    ActivateCustom {
        ext_id: ExtensionId,
        data: JsonValue,
        reply: oneshot::Sender<RuntimeResult<()>>,
    },
    UpdatePreference {
        ext_id: ExtensionId,
        preference_id: String,
        value: JsonValue,
        reply: oneshot::Sender<()>,
    },
    SetKeyword {
        ext_id: ExtensionId,
        trigger_id: String,
        keyword: String,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<RuntimeStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a running [`ExtensionRuntime`]
///
/// Every method fails with [`RuntimeError::Shutdown`] once the runtime
/// loop has exited.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<RuntimeCommand>,
}

impl RuntimeHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> RuntimeResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| RuntimeError::Shutdown)?;
        response.await.map_err(|_| RuntimeError::Shutdown)
    }

    /// Bind the extension socket and accept registrations
    pub async fn start_server(&self) -> RuntimeResult<()> {
        self.request(|reply| RuntimeCommand::StartServer { reply })
            .await?
    }

    pub async fn stop_server(&self) -> RuntimeResult<()> {
        self.request(|reply| RuntimeCommand::StopServer { reply })
            .await?
    }

    pub async fn run(&self, ext_id: impl Into<ExtensionId>) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        self.request(|reply| RuntimeCommand::Run { ext_id, reply })
            .await?
    }

    pub async fn stop(&self, ext_id: impl Into<ExtensionId>) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        self.request(|reply| RuntimeCommand::Stop { ext_id, reply })
            .await?
    }

    /// Stop each extension if it is running, then start it again
    pub async fn reload(
        &self,
        ext_ids: impl IntoIterator<Item = ExtensionId>,
    ) -> RuntimeResult<Vec<(ExtensionId, RuntimeResult<()>)>> {
        let mut outcomes = Vec::new();
        for ext_id in ext_ids {
            let target = ext_id.clone();
            let outcome = self
                .request(|reply| RuntimeCommand::Reload {
                    ext_id: target,
                    reply,
                })
                .await?;
            outcomes.push((ext_id, outcome));
        }
        Ok(outcomes)
    }

    /// Start every installed extension without a recorded error
    pub async fn run_all(&self) -> RuntimeResult<Vec<ExtensionId>> {
        self.request(|reply| RuntimeCommand::RunAll { reply }).await
    }

    pub async fn stop_all(&self) -> RuntimeResult<usize> {
        self.request(|reply| RuntimeCommand::StopAll { reply }).await
    }

    pub async fn get_error(
        &self,
        ext_id: impl Into<ExtensionId>,
    ) -> RuntimeResult<Option<ExtensionError>> {
        let ext_id = ext_id.into();
        self.request(|reply| RuntimeCommand::GetError { ext_id, reply })
            .await
    }

    pub async fn set_error(
        &self,
        ext_id: impl Into<ExtensionId>,
        error: ExtensionError,
    ) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        self.request(|reply| RuntimeCommand::SetError {
            ext_id,
            error,
            reply,
        })
        .await
    }

    pub async fn is_running(&self, ext_id: impl Into<ExtensionId>) -> RuntimeResult<bool> {
        let ext_id = ext_id.into();
        self.request(|reply| RuntimeCommand::IsRunning { ext_id, reply })
            .await
    }

    /// Route query text to the extension owning its keyword
    ///
    /// Any earlier query is abandoned first. Returns the extension the
    /// query went to.
    pub async fn handle_query(&self, text: impl Into<String>) -> RuntimeResult<Option<ExtensionId>> {
        let text = text.into();
        self.request(|reply| RuntimeCommand::HandleQuery { text, reply })
            .await
    }

    /// The query changed without being routed to an extension
    pub async fn query_changed(&self) -> RuntimeResult<()> {
        self.request(|reply| RuntimeCommand::QueryChanged { reply })
            .await
    }

    pub async fn launch_trigger(
        &self,
        ext_id: impl Into<ExtensionId>,
        trigger_id: impl Into<String>,
    ) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        let trigger_id = trigger_id.into();
        self.request(|reply| RuntimeCommand::LaunchTrigger {
            ext_id,
            trigger_id,
            reply,
        })
        .await?
    }

    /// Hand custom action data back to the extension that produced it
    pub async fn activate_custom(
        &self,
        ext_id: impl Into<ExtensionId>,
        data: JsonValue,
    ) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        self.request(|reply| RuntimeCommand::ActivateCustom {
            ext_id,
            data,
            reply,
        })
        .await?
    }

    /// Store a preference and tell the extension if it is connected
    pub async fn update_preference(
        &self,
        ext_id: impl Into<ExtensionId>,
        preference_id: impl Into<String>,
        value: JsonValue,
    ) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        let preference_id = preference_id.into();
        self.request(|reply| RuntimeCommand::UpdatePreference {
            ext_id,
            preference_id,
            value,
            reply,
        })
        .await
    }

    pub async fn set_keyword(
        &self,
        ext_id: impl Into<ExtensionId>,
        trigger_id: impl Into<String>,
        keyword: impl Into<String>,
    ) -> RuntimeResult<()> {
        let ext_id = ext_id.into();
        let trigger_id = trigger_id.into();
        let keyword = keyword.into();
        self.request(|reply| RuntimeCommand::SetKeyword {
            ext_id,
            trigger_id,
            keyword,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> RuntimeResult<RuntimeStatus> {
        self.request(|reply| RuntimeCommand::Status { reply }).await
    }

    pub async fn connected_extensions(&self) -> RuntimeResult<Vec<ExtensionId>> {
        Ok(self.status().await?.connected)
    }

    /// Stop the server and every extension, then end the runtime loop
    ///
    /// Resolves once no stopped process can still need a SIGKILL.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        self.request(|reply| RuntimeCommand::Shutdown { reply })
            .await
    }
}

pub struct ExtensionRuntime {
    socket_path: PathBuf,
    default_debounce: Duration,
    prefs: Box<dyn PreferenceStore>,
    server: RegistrationServer,
    supervisor: Supervisor,
    controllers: ControllerRegistry,
    correlator: Correlator,
    timers: Timers<TimerKind>,
    commands: mpsc::UnboundedReceiver<RuntimeCommand>,
    commands_closed: bool,
    incoming_tx: IncomingSender,
    incoming_rx: IncomingReceiver,
    framer_tx: FramerEventSender<ExtensionMessage>,
    framer_rx: FramerEventReceiver<ExtensionMessage>,
    process_rx: ProcessEventReceiver,
    timer_rx: TimerReceiver,
    shutdown: Option<Vec<oneshot::Sender<()>>>,
}

impl ExtensionRuntime {
    /// Build a runtime; nothing happens until [`ExtensionRuntime::run`]
    /// is polled
    pub fn new(
        config: &LanternConfig,
        prefs: Box<dyn PreferenceStore>,
    ) -> (Self, RuntimeHandle, UiEventReceiver) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (framer_tx, framer_rx) = mpsc::unbounded_channel();
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (timers, timer_rx) = Timers::channel();

        let finder = ExtensionFinder::new(config.extensions.directories.clone());
        let supervisor = Supervisor::new(SupervisorSettings::from_config(config), finder, process_tx);

        let runtime = Self {
            socket_path: config.runtime.socket_path.clone(),
            default_debounce: config.runtime.default_input_debounce,
            prefs,
            server: RegistrationServer::new(config.runtime.codec),
            supervisor,
            controllers: ControllerRegistry::new(),
            correlator: Correlator::new(config.runtime.loading_delay, ui_tx),
            timers,
            commands,
            commands_closed: false,
            incoming_tx,
            incoming_rx,
            framer_tx,
            framer_rx,
            process_rx,
            timer_rx,
            shutdown: None,
        };
        (runtime, RuntimeHandle { commands: command_tx }, ui_rx)
    }

    /// Build a runtime and run it on a new task
    pub fn spawn(
        config: &LanternConfig,
        prefs: Box<dyn PreferenceStore>,
    ) -> (RuntimeHandle, UiEventReceiver, JoinHandle<()>) {
        let (runtime, handle, ui) = Self::new(config, prefs);
        (handle, ui, tokio::spawn(runtime.run()))
    }

    /// Drain the event channels until shut down
    ///
    /// Dropping every [`RuntimeHandle`] shuts the runtime down as well.
    pub async fn run(mut self) {
        info!("Extension runtime started");
        loop {
            tokio::select! {
                command = self.commands.recv(), if !self.commands_closed => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All runtime handles dropped, shutting down");
                        self.commands_closed = true;
                        self.begin_shutdown(None);
                    }
                },
                Some(stream) = self.incoming_rx.recv() => self.on_incoming(stream),
                Some((framer_id, event)) = self.framer_rx.recv() => {
                    self.on_framer_event(framer_id, event)
                }
                Some(event) = self.process_rx.recv() => {
                    self.supervisor.on_process_event(event, &mut self.timers)
                }
                Some(timer) = self.timer_rx.recv() => self.on_timer(timer),
            }

            if self.shutdown.is_some() && !self.supervisor.has_stopping() {
                break;
            }
        }

        for reply in self.shutdown.take().unwrap_or_default() {
            let _ = reply.send(());
        }
        info!("Extension runtime stopped");
    }

    fn handle_command(&mut self, command: RuntimeCommand) {
        match command {
            RuntimeCommand::StartServer { reply } => {
                let _ = reply.send(self.start_server());
            }
            RuntimeCommand::StopServer { reply } => {
                let _ = reply.send(self.server.stop());
            }
            RuntimeCommand::Run { ext_id, reply } => {
                let _ = reply.send(self.supervisor.run(&ext_id, &*self.prefs, &mut self.timers));
            }
            RuntimeCommand::Stop { ext_id, reply } => {
                let _ = reply.send(self.supervisor.stop(&ext_id, &mut self.timers));
            }
            RuntimeCommand::Reload { ext_id, reply } => {
                let _ = reply.send(self.reload(&ext_id));
            }
            RuntimeCommand::RunAll { reply } => {
                let _ = reply.send(self.supervisor.run_all(&*self.prefs, &mut self.timers));
            }
            RuntimeCommand::StopAll { reply } => {
                let _ = reply.send(self.supervisor.stop_all(&mut self.timers));
            }
            RuntimeCommand::GetError { ext_id, reply } => {
                let _ = reply.send(self.supervisor.get_error(&ext_id).cloned());
            }
            RuntimeCommand::SetError {
                ext_id,
                error,
                reply,
            } => {
                self.supervisor.set_error(ext_id, error);
                let _ = reply.send(());
            }
            RuntimeCommand::IsRunning { ext_id, reply } => {
                let _ = reply.send(self.supervisor.is_running(&ext_id));
            }
            RuntimeCommand::HandleQuery { text, reply } => {
                let _ = reply.send(self.handle_query(&text));
            }
            RuntimeCommand::QueryChanged { reply } => {
                self.correlator.on_query_changed(&mut self.timers);
                let _ = reply.send(());
            }
            RuntimeCommand::LaunchTrigger {
                ext_id,
                trigger_id,
                reply,
            } => {
                let event = ExtensionEvent::launch_trigger(ext_id.as_str(), trigger_id);
                let _ = reply.send(self.dispatch(&ext_id, event));
            }
            RuntimeCommand::ActivateCustom {
                ext_id,
                data,
                reply,
            } => {
                let event = ExtensionEvent::activate_custom(ext_id.as_str(), data);
                let _ = reply.send(self.dispatch(&ext_id, event));
            }
            RuntimeCommand::UpdatePreference {
                ext_id,
                preference_id,
                value,
                reply,
            } => {
                self.update_preference(&ext_id, &preference_id, value);
                let _ = reply.send(());
            }
            RuntimeCommand::SetKeyword {
                ext_id,
                trigger_id,
                keyword,
                reply,
            } => {
                self.set_keyword(&ext_id, &trigger_id, keyword);
                let _ = reply.send(());
            }
            RuntimeCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            RuntimeCommand::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    fn start_server(&mut self) -> RuntimeResult<()> {
        self.server.start(&self.socket_path, self.incoming_tx.clone())?;
        // connections of an earlier server run are stale now
        self.correlator.on_query_changed(&mut self.timers);
        for controller in self.controllers.drain() {
            controller.close(&mut self.timers);
        }
        Ok(())
    }

    fn reload(&mut self, ext_id: &ExtensionId) -> RuntimeResult<()> {
        match self.supervisor.stop(ext_id, &mut self.timers) {
            Ok(()) | Err(RuntimeError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.supervisor.run(ext_id, &*self.prefs, &mut self.timers)
    }

    fn handle_query(&mut self, text: &str) -> Option<ExtensionId> {
        self.correlator.on_query_changed(&mut self.timers);

        let query = Query::parse(text);
        let prefs = &*self.prefs;
        let candidates = self
            .controllers
            .iter()
            .map(|(ext_id, controller)| (ext_id, prefs.user_keywords(ext_id, controller.manifest())));
        let (ext_id, trigger_id) = route(&query, candidates)?;

        let event = ExtensionEvent::input_trigger(ext_id.as_str(), query.argument, trigger_id);
        let controller = self.controllers.get_mut(&ext_id)?;
        self.correlator.dispatch(event, controller, &mut self.timers);
        Some(ext_id)
    }

    /// Send an event that expects a response through the correlator
    fn dispatch(&mut self, ext_id: &ExtensionId, event: ExtensionEvent) -> RuntimeResult<()> {
        let controller = self
            .controllers
            .get_mut(ext_id)
            .ok_or_else(|| RuntimeError::NotRunning(ext_id.clone()))?;
        self.correlator.dispatch(event, controller, &mut self.timers);
        Ok(())
    }

    fn update_preference(&mut self, ext_id: &ExtensionId, preference_id: &str, value: JsonValue) {
        let previous = self
            .prefs
            .set_user_preference(ext_id, preference_id, value.clone());
        let Some(controller) = self.controllers.get_mut(ext_id) else {
            debug!("Extension {} is not connected, preference stored only", ext_id);
            return;
        };
        let old_value = previous
            .or_else(|| {
                controller
                    .manifest()
                    .preferences
                    .get(preference_id)
                    .map(|preference| preference.default_value.clone())
            })
            .unwrap_or(JsonValue::Null);
        if old_value == value {
            debug!("Preference {} of {} is unchanged", preference_id, ext_id);
            return;
        }
        let event = ExtensionEvent::update_preferences(ext_id.as_str(), preference_id, value, old_value);
        controller.trigger_event(event, &mut self.timers);
    }

    fn set_keyword(&mut self, ext_id: &ExtensionId, trigger_id: &str, keyword: String) {
        let Some(controller) = self.controllers.get_mut(ext_id) else {
            self.prefs.set_user_keyword(ext_id, trigger_id, keyword);
            return;
        };
        let old_keyword = self
            .prefs
            .user_keywords(ext_id, controller.manifest())
            .remove(trigger_id)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null);
        self.prefs.set_user_keyword(ext_id, trigger_id, keyword.clone());
        if old_keyword == JsonValue::String(keyword.clone()) {
            debug!("Keyword of {} trigger {} is unchanged", ext_id, trigger_id);
            return;
        }
        let event = ExtensionEvent::update_preferences(
            ext_id.as_str(),
            trigger_id,
            JsonValue::String(keyword),
            old_keyword,
        );
        controller.trigger_event(event, &mut self.timers);
    }

    fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            socket_path: self.server.socket_path().map(PathBuf::from),
            running: self.supervisor.running(),
            connected: self.controllers.ids(),
            pending_connections: self.server.pending_count(),
        }
    }

    fn on_incoming(&mut self, stream: UnixStream) {
        if !self.server.is_running() {
            debug!("Dropping connection accepted before the server stopped");
            return;
        }
        self.server.on_incoming(stream, &self.framer_tx);
    }

    fn on_framer_event(&mut self, framer_id: FramerId, event: FramerEvent<ExtensionMessage>) {
        // handlers are looked up now, not when the frame was read
        let signal = event.signal();
        let subscribers = match self.controllers.by_framer(framer_id) {
            Some(controller) => controller.subscribers(signal),
            None => self.server.subscribers(framer_id, signal),
        };
        if subscribers.is_empty() {
            debug!("No handler for {:?} on {}", signal, framer_id);
            return;
        }

        for subscriber in subscribers {
            match (subscriber, event.clone()) {
                (Subscriber::Server, FramerEvent::MessageParsed(message)) => {
                    if let Some((connection, ext_id)) = self.server.on_message(framer_id, message) {
                        self.on_registered(connection, ext_id);
                    }
                }
                (Subscriber::Server, FramerEvent::Closed) => {
                    self.server.on_pending_closed(framer_id);
                }
                (Subscriber::Controller(ext_id), FramerEvent::MessageParsed(message)) => {
                    self.on_controller_message(framer_id, &ext_id, message)
                }
                (Subscriber::Controller(ext_id), FramerEvent::Closed) => {
                    self.on_controller_closed(framer_id, &ext_id)
                }
            }
        }
    }

    fn on_registered(&mut self, connection: Connection, ext_id: ExtensionId) {
        let (dir, manifest) = match self.supervisor.load_extension(&ext_id) {
            Ok(found) => found,
            Err(e) => {
                warn!("Rejecting registration of {}: {}", ext_id, e);
                connection.close();
                return;
            }
        };

        let preferences = preferences_snapshot(&*self.prefs, &ext_id, &manifest);
        let controller = Controller::new(
            ext_id,
            connection,
            dir,
            manifest,
            self.default_debounce,
            preferences,
        );
        if let Some(stale) = self.controllers.insert(controller) {
            self.correlator.forget(stale.framer_id(), &mut self.timers);
            stale.close(&mut self.timers);
        }
    }

    fn on_controller_message(
        &mut self,
        framer_id: FramerId,
        ext_id: &ExtensionId,
        message: ExtensionMessage,
    ) {
        match message {
            ExtensionMessage::Response(response) => {
                self.correlator
                    .on_response(framer_id, response, &mut self.timers);
            }
            ExtensionMessage::Registration(_) => {
                warn!("Extension {} sent a second registration", ext_id)
            }
            ExtensionMessage::Unrecognized(value) => {
                warn!("Unrecognized message from extension {}: {}", ext_id, value)
            }
        }
    }

    fn on_controller_closed(&mut self, framer_id: FramerId, ext_id: &ExtensionId) {
        let Some(controller) = self.controllers.remove_by_framer(framer_id) else {
            return;
        };
        info!("Extension {} disconnected", ext_id);
        self.correlator.forget(framer_id, &mut self.timers);
        controller.close(&mut self.timers);
    }

    fn on_timer(&mut self, timer: TimerId) {
        let Some(kind) = self.timers.take(timer) else {
            return;
        };
        match kind {
            TimerKind::Debounce(ext_id) => {
                if let Some(controller) = self.controllers.get_mut(&ext_id) {
                    controller.on_debounce_timer(timer);
                }
            }
            TimerKind::Loading => self.correlator.on_loading_timer(timer),
            TimerKind::Kill { generation } => self.supervisor.on_kill_timer(generation),
            TimerKind::Restart(ext_id) => {
                self.supervisor
                    .on_restart_timer(&ext_id, timer, &*self.prefs)
            }
        }
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        let already_stopping = self.shutdown.is_some();
        self.shutdown.get_or_insert_with(Vec::new).extend(reply);
        if already_stopping {
            return;
        }

        info!("Shutting down extension runtime");
        if self.server.is_running() {
            if let Err(e) = self.server.stop() {
                warn!("Failed to stop extension server: {}", e);
            }
        }
        self.correlator.on_query_changed(&mut self.timers);
        for controller in self.controllers.drain() {
            controller.close(&mut self.timers);
        }
        let stopped = self.supervisor.stop_all(&mut self.timers);
        debug!("Stopping {} extension processes", stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::UiEvent;
    use crate::error::ErrorKind;
    use crate::preferences::InMemoryPreferences;
    use lantern_ipc::{Action, ExtensionClient, ResultItem, WireCodec};
    use serde_json::json;
    use std::path::Path;

    struct Harness {
        handle: RuntimeHandle,
        ui: UiEventReceiver,
        task: JoinHandle<()>,
        socket: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn install(root: &Path, id: &str, manifest: JsonValue) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    }

    fn demo_manifest(api: &str) -> JsonValue {
        json!({
            "required_api_version": api,
            "name": "Demo",
            "authors": "Tests",
            "icon": "icon.png",
            "input_debounce": 0,
            "triggers": { "main": { "name": "Demo", "keyword": "dm" } },
            "preferences": {
                "limit": { "name": "Limit", "type": "number", "default_value": 5 }
            }
        })
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let extensions = dir.path().join("extensions");
            install(&extensions, "demo", demo_manifest("2"));
            install(&extensions, "future", demo_manifest("9"));

            let mut config = LanternConfig::default();
            config.runtime.socket_path = dir.path().join("extensions.sock");
            config.runtime.loading_delay = Duration::from_secs(30);
            config.extensions.directories = vec![extensions];

            let (handle, ui, task) =
                ExtensionRuntime::spawn(&config, Box::new(InMemoryPreferences::new()));
            Self {
                handle,
                ui,
                task,
                socket: config.runtime.socket_path,
                _dir: dir,
            }
        }

        async fn connect(&self, id: &str) -> ExtensionClient {
            ExtensionClient::connect(&self.socket, id, WireCodec::Json)
                .await
                .unwrap()
        }

        /// Register `id` and wait for its preferences snapshot
        async fn register(&self, id: &str) -> ExtensionClient {
            let mut client = self.connect(id).await;
            let first = client.next_event().await.unwrap();
            assert!(matches!(first, ExtensionEvent::PreferencesLoad { .. }));
            client
        }

        async fn next_ui_event(&mut self) -> UiEvent {
            tokio::time::timeout(Duration::from_secs(5), self.ui.recv())
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_server_start_stop_errors() {
        let h = Harness::new();
        assert!(matches!(
            h.handle.stop_server().await,
            Err(RuntimeError::ServerNotRunning)
        ));
        h.handle.start_server().await.unwrap();
        assert!(matches!(
            h.handle.start_server().await,
            Err(RuntimeError::ServerAlreadyRunning)
        ));
        assert_eq!(
            h.handle.status().await.unwrap().socket_path,
            Some(h.socket.clone())
        );
        h.handle.stop_server().await.unwrap();
        assert!(!h.socket.exists());
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let mut h = Harness::new();
        h.handle.start_server().await.unwrap();
        let mut client = h.register("demo").await;
        assert_eq!(
            h.handle.connected_extensions().await.unwrap(),
            vec![ExtensionId::new("demo")]
        );

        // no keyword match
        assert_eq!(h.handle.handle_query("xx rust").await.unwrap(), None);
        // a bare keyword is not dispatched until an argument follows
        assert_eq!(h.handle.handle_query("dm").await.unwrap(), None);

        assert_eq!(
            h.handle.handle_query("dm rust").await.unwrap(),
            Some(ExtensionId::new("demo"))
        );
        let event = client.next_event().await.unwrap();
        assert_eq!(
            event,
            ExtensionEvent::input_trigger("demo", Some("rust".to_string()), "main")
        );

        client.respond(event, Action::render(vec![ResultItem::new("hit")]));
        assert_eq!(
            h.next_ui_event().await,
            UiEvent::ShowResults {
                ext_id: ExtensionId::new("demo"),
                results: vec![ResultItem::new("hit")],
            }
        );
    }

    #[tokio::test]
    async fn test_keyword_override_and_preference_update() {
        let h = Harness::new();
        h.handle.start_server().await.unwrap();
        let mut client = h.register("demo").await;

        h.handle.set_keyword("demo", "main", "d").await.unwrap();
        assert_eq!(
            client.next_event().await.unwrap(),
            ExtensionEvent::update_preferences("demo", "main", json!("d"), json!("dm"))
        );
        assert_eq!(h.handle.handle_query("dm rust").await.unwrap(), None);
        assert!(h.handle.handle_query("d rust").await.unwrap().is_some());
        client.next_event().await.unwrap();

        // unchanged values are stored without telling the extension
        h.handle.set_keyword("demo", "main", "d").await.unwrap();
        h.handle.update_preference("demo", "limit", json!(5)).await.unwrap();
        h.handle.update_preference("demo", "limit", json!(7)).await.unwrap();
        assert_eq!(
            client.next_event().await.unwrap(),
            ExtensionEvent::update_preferences("demo", "limit", json!(7), json!(5))
        );
    }

    #[tokio::test]
    async fn test_unknown_and_incompatible_registrations_are_rejected() {
        let h = Harness::new();
        h.handle.start_server().await.unwrap();

        let mut ghost = h.connect("ghost").await;
        assert!(ghost.next_event().await.is_none());

        let mut future = h.connect("future").await;
        assert!(future.next_event().await.is_none());
        assert!(h.handle.connected_extensions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_connection() {
        let h = Harness::new();
        h.handle.start_server().await.unwrap();

        let mut first = h.register("demo").await;
        let mut second = h.register("demo").await;
        assert!(first.next_event().await.is_none());

        h.handle.handle_query("dm x").await.unwrap();
        assert!(matches!(
            second.next_event().await,
            Some(ExtensionEvent::InputTrigger { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_registration_on_connection_is_ignored() {
        let h = Harness::new();
        h.handle.start_server().await.unwrap();
        let mut client = h.register("demo").await;

        client.send_raw(&json!({"type": "socket_connected", "ext_id": "demo"}));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.connected, vec![ExtensionId::new("demo")]);
        assert_eq!(status.pending_connections, 0);

        // no fresh preferences snapshot; the same connection still gets queries
        h.handle.handle_query("dm x").await.unwrap();
        assert_eq!(
            client.next_event().await.unwrap(),
            ExtensionEvent::input_trigger("demo", Some("x".to_string()), "main")
        );
    }

    #[tokio::test]
    async fn test_dispatch_needs_connection() {
        let h = Harness::new();
        assert!(matches!(
            h.handle.launch_trigger("demo", "main").await,
            Err(RuntimeError::NotRunning(_))
        ));
        assert!(matches!(
            h.handle.run("future").await,
            Err(RuntimeError::Manifest(_))
        ));
        assert_eq!(
            h.handle.get_error("future").await.unwrap().unwrap().kind,
            ErrorKind::IncompatibleVersion
        );

        h.handle
            .set_error("demo", ExtensionError::new(ErrorKind::Terminated, "gone"))
            .await
            .unwrap();
        assert_eq!(
            h.handle.get_error("demo").await.unwrap().unwrap().message,
            "gone"
        );
        assert!(!h.handle.is_running("demo").await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let h = Harness::new();
        h.handle.start_server().await.unwrap();
        let mut client = h.register("demo").await;

        h.handle.shutdown().await.unwrap();
        assert!(client.next_event().await.is_none());
        assert!(!h.socket.exists());
        h.task.await.unwrap();
        assert!(matches!(
            h.handle.status().await,
            Err(RuntimeError::Shutdown)
        ));
    }
}
