//! Extension controllers
//!
//! A controller binds an extension identity to its registered connection
//! and the settings from its manifest. It exists only while the connection
//! is open.

use lantern_ipc::{ExtensionEvent, FramerId, FramerSignal, HandlerId};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::debounce::Debouncer;
use crate::identity::ExtensionId;
use crate::manifest::ExtensionManifest;
use crate::server::{Connection, Subscriber};
use crate::timer::{TimerId, TimerKind, Timers};

#[derive(Debug)]
pub struct Controller {
    ext_id: ExtensionId,
    connection: Connection,
    handlers: Vec<HandlerId>,
    dir: PathBuf,
    manifest: ExtensionManifest,
    debouncer: Debouncer<ExtensionEvent>,
}

impl Controller {
    /// Take over a registered connection and send the preferences snapshot
    pub fn new(
        ext_id: ExtensionId,
        mut connection: Connection,
        dir: PathBuf,
        manifest: ExtensionManifest,
        default_debounce: Duration,
        preferences: Map<String, JsonValue>,
    ) -> Self {
        let handlers = vec![
            connection.connect(
                FramerSignal::MessageParsed,
                Subscriber::Controller(ext_id.clone()),
            ),
            connection.connect(FramerSignal::Closed, Subscriber::Controller(ext_id.clone())),
        ];
        connection.send(&ExtensionEvent::preferences_load(preferences));

        let debouncer = Debouncer::new(manifest.input_debounce(default_debounce));
        Self {
            ext_id,
            connection,
            handlers,
            dir,
            manifest,
            debouncer,
        }
    }

    pub fn ext_id(&self) -> &ExtensionId {
        &self.ext_id
    }

    pub fn framer_id(&self) -> FramerId {
        self.connection.id()
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn debounce_interval(&self) -> Duration {
        self.debouncer.interval()
    }

    /// Absolute path of the extension icon
    pub fn icon(&self) -> Option<String> {
        self.manifest
            .icon_path(&self.dir)
            .map(|path| path.to_string_lossy().into_owned())
    }

    /// Send an event, coalescing rapid input
    ///
    /// Preference updates go out immediately and leave a pending debounced
    /// event untouched.
    pub fn trigger_event(&mut self, event: ExtensionEvent, timers: &mut Timers<TimerKind>) {
        if event.is_preference_update() || self.debouncer.interval().is_zero() {
            self.send_now(&event);
        } else {
            self.debouncer
                .schedule(event, timers, TimerKind::Debounce(self.ext_id.clone()));
        }
    }

    /// Debounce timer fired; returns whether an event was sent
    pub fn on_debounce_timer(&mut self, timer: TimerId) -> bool {
        match self.debouncer.on_fire(timer) {
            Some(event) => {
                self.send_now(&event);
                true
            }
            None => false,
        }
    }

    fn send_now(&self, event: &ExtensionEvent) {
        debug!("Sending {:?} to extension {}", event, self.ext_id);
        self.connection.send(event);
    }

    /// Current subscribers of a signal on this controller's connection
    pub fn subscribers(&self, signal: FramerSignal) -> Vec<Subscriber> {
        self.connection.subscribers(signal)
    }

    /// Drop any pending event, release the connection and close it
    pub fn close(mut self, timers: &mut Timers<TimerKind>) {
        self.debouncer.cancel(timers);
        for handler in self.handlers.drain(..) {
            self.connection.disconnect(handler);
        }
        self.connection.close();
    }
}

/// Registered controllers by identity, with a reverse index by connection
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<ExtensionId, Controller>,
    by_framer: HashMap<FramerId, ExtensionId>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller, returning the stale one it replaced
    pub fn insert(&mut self, controller: Controller) -> Option<Controller> {
        let ext_id = controller.ext_id().clone();
        self.by_framer.insert(controller.framer_id(), ext_id.clone());
        let replaced = self.controllers.insert(ext_id.clone(), controller);
        if let Some(stale) = &replaced {
            info!(
                "Extension {} registered again, replacing connection {}",
                ext_id,
                stale.framer_id()
            );
            self.by_framer.remove(&stale.framer_id());
        }
        replaced
    }

    /// Remove the controller owning `framer_id`
    pub fn remove_by_framer(&mut self, framer_id: FramerId) -> Option<Controller> {
        let ext_id = self.by_framer.remove(&framer_id)?;
        self.controllers.remove(&ext_id)
    }

    pub fn get_mut(&mut self, ext_id: &ExtensionId) -> Option<&mut Controller> {
        self.controllers.get_mut(ext_id)
    }

    pub fn by_framer(&self, framer_id: FramerId) -> Option<&Controller> {
        self.by_framer
            .get(&framer_id)
            .and_then(|ext_id| self.controllers.get(ext_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExtensionId, &Controller)> {
        self.controllers.iter()
    }

    pub fn ids(&self) -> Vec<ExtensionId> {
        self.controllers.keys().cloned().collect()
    }

    /// Remove every controller
    pub fn drain(&mut self) -> Vec<Controller> {
        self.by_framer.clear();
        std::mem::take(&mut self.controllers).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_ipc::{Framer, FramerEvent, FramerEventReceiver, WireCodec};
    use serde_json::json;
    use tokio::net::UnixStream;
    use tokio::sync::mpsc;

    fn manifest(debounce: f64) -> ExtensionManifest {
        serde_json::from_value(json!({
            "required_api_version": "2",
            "name": "Demo",
            "authors": "Tests",
            "icon": "icon.png",
            "input_debounce": debounce,
            "triggers": { "main": { "name": "Demo", "keyword": "dm" } }
        }))
        .unwrap()
    }

    /// Controller plus the extension end of its connection
    fn controller(
        id: &str,
        debounce: f64,
    ) -> (
        Controller,
        Framer<ExtensionEvent>,
        FramerEventReceiver<ExtensionEvent>,
    ) {
        let (host, extension) = UnixStream::pair().unwrap();
        let (host_tx, _host_rx) = mpsc::unbounded_channel();
        let connection = Connection::spawn(host, WireCodec::Json, host_tx);
        let (ext_tx, ext_rx) = mpsc::unbounded_channel();
        let extension = Framer::spawn(extension, WireCodec::Json, ext_tx);

        let controller = Controller::new(
            ExtensionId::new(id),
            connection,
            PathBuf::from("/ext").join(id),
            manifest(debounce),
            Duration::from_millis(50),
            Map::from_iter([("limit".to_string(), json!(5))]),
        );
        (controller, extension, ext_rx)
    }

    async fn received(rx: &mut FramerEventReceiver<ExtensionEvent>) -> ExtensionEvent {
        match rx.recv().await.unwrap() {
            (_, FramerEvent::MessageParsed(event)) => event,
            (_, other) => panic!("expected an event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_controller_sends_preferences() {
        let (controller, _extension, mut rx) = controller("demo", 0.05);
        assert_eq!(
            received(&mut rx).await,
            ExtensionEvent::preferences_load(Map::from_iter([("limit".to_string(), json!(5))]))
        );
        assert_eq!(controller.icon(), Some("/ext/demo/icon.png".to_string()));
        assert_eq!(
            controller.subscribers(FramerSignal::Closed),
            vec![Subscriber::Controller(ExtensionId::new("demo"))]
        );
    }

    #[tokio::test]
    async fn test_input_is_debounced_but_preferences_are_not() {
        let (mut controller, _extension, mut rx) = controller("demo", 0.05);
        let (mut timers, mut fired) = Timers::channel();
        received(&mut rx).await;

        for argument in ["a", "ab"] {
            controller.trigger_event(
                ExtensionEvent::input_trigger("demo", Some(argument.to_string()), "main"),
                &mut timers,
            );
        }
        let update = ExtensionEvent::update_preferences("demo", "limit", json!(6), json!(5));
        controller.trigger_event(update.clone(), &mut timers);

        // the preference update overtakes the pending input
        assert_eq!(received(&mut rx).await, update);

        let timer = fired.recv().await.unwrap();
        assert_eq!(
            timers.take(timer),
            Some(TimerKind::Debounce(ExtensionId::new("demo")))
        );
        assert!(controller.on_debounce_timer(timer));
        assert_eq!(
            received(&mut rx).await,
            ExtensionEvent::input_trigger("demo", Some("ab".into()), "main")
        );
        assert!(!controller.on_debounce_timer(timer));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_input() {
        let (mut controller, _extension, mut rx) = controller("demo", 0.05);
        let (mut timers, _fired) = Timers::channel();
        received(&mut rx).await;

        controller.trigger_event(ExtensionEvent::launch_trigger("demo", "main"), &mut timers);
        assert_eq!(timers.len(), 1);
        controller.close(&mut timers);
        assert!(timers.is_empty());

        assert!(matches!(rx.recv().await, Some((_, FramerEvent::Closed))));
    }

    #[tokio::test]
    async fn test_registry_replaces_stale_controller() {
        let mut registry = ControllerRegistry::new();
        let (first, _e1, _r1) = controller("demo", 0.05);
        let (second, _e2, _r2) = controller("demo", 0.05);
        let (first_fid, second_fid) = (first.framer_id(), second.framer_id());

        assert!(registry.insert(first).is_none());
        let stale = registry.insert(second).unwrap();
        assert_eq!(stale.framer_id(), first_fid);
        assert_eq!(registry.len(), 1);

        // the stale connection no longer maps to anything
        assert!(registry.by_framer(first_fid).is_none());
        assert!(registry.remove_by_framer(first_fid).is_none());
        assert_eq!(registry.by_framer(second_fid).unwrap().ext_id().as_str(), "demo");

        assert!(registry.remove_by_framer(second_fid).is_some());
        assert!(registry.is_empty());
    }
}
