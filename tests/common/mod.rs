//! Host fixture shared by the end-to-end tests

#![allow(dead_code)]

use lantern_config::LanternConfig;
use lantern_extensions::{
    ExtensionId, ExtensionRuntime, InMemoryPreferences, RuntimeHandle, UiEvent, UiEventReceiver,
};
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const ECHO_EXTENSION: &str = env!("CARGO_BIN_EXE_echo-extension");

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Manifest of the echo extension under keyword `keyword`
pub fn echo_manifest(keyword: &str) -> JsonValue {
    json!({
        "required_api_version": "^2.0",
        "name": "Echo",
        "authors": "Lantern tests",
        "icon": "images/icon.svg",
        "input_debounce": 0,
        "command": [ECHO_EXTENSION],
        "triggers": {
            "main": { "name": "Echo", "keyword": keyword },
            "about": { "name": "About echo" }
        },
        "preferences": {
            "greeting": { "name": "Greeting", "type": "input", "default_value": "hello" }
        }
    })
}

/// Manifest of an extension that runs `script` under /bin/sh
pub fn shell_manifest(script: &str) -> JsonValue {
    json!({
        "required_api_version": "2",
        "name": "Shell",
        "authors": "Lantern tests",
        "icon": "icon.png",
        "command": ["/bin/sh", "-c", script],
        "triggers": { "main": { "name": "Shell", "keyword": "sh" } }
    })
}

pub struct Host {
    pub handle: RuntimeHandle,
    pub ui: UiEventReceiver,
    pub task: JoinHandle<()>,
    pub config: LanternConfig,
    dir: TempDir,
}

impl Host {
    /// Install `extensions` and start a runtime with its server listening
    pub async fn start(extensions: &[(&str, JsonValue)]) -> Self {
        Self::start_with(extensions, |_| {}).await
    }

    pub async fn start_with(
        extensions: &[(&str, JsonValue)],
        configure: impl FnOnce(&mut LanternConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("extensions");
        for (id, manifest) in extensions {
            install(&root, id, manifest);
        }

        let mut config = LanternConfig::default();
        config.runtime.socket_path = dir.path().join("lantern.sock");
        // keep placeholders out of the way unless a test asks for them
        config.runtime.loading_delay = Duration::from_secs(30);
        config.runtime.restart.initial_delay = Duration::from_millis(300);
        config.extensions.directories = vec![root];
        configure(&mut config);

        let (handle, ui, task) =
            ExtensionRuntime::spawn(&config, Box::new(InMemoryPreferences::new()));
        handle.start_server().await.unwrap();
        Self {
            handle,
            ui,
            task,
            config,
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.runtime.socket_path.clone()
    }

    /// Run an extension and wait until it has registered
    pub async fn run_connected(&self, id: &str) {
        self.handle.run(id).await.unwrap();
        self.wait_connected(id).await;
    }

    pub async fn wait_connected(&self, id: &str) {
        let ext_id = ExtensionId::new(id);
        self.wait_for(|handle| {
            let ext_id = ext_id.clone();
            async move { handle.connected_extensions().await.unwrap().contains(&ext_id) }
        })
        .await;
    }

    pub async fn wait_disconnected(&self, id: &str) {
        let ext_id = ExtensionId::new(id);
        self.wait_for(|handle| {
            let ext_id = ext_id.clone();
            async move { !handle.connected_extensions().await.unwrap().contains(&ext_id) }
        })
        .await;
    }

    /// Poll `condition` until it holds; panics after a timeout
    pub async fn wait_for<F, Fut>(&self, mut condition: F)
    where
        F: FnMut(RuntimeHandle) -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while !condition(self.handle.clone()).await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within {:?}",
                WAIT_TIMEOUT
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn next_ui_event(&mut self) -> UiEvent {
        tokio::time::timeout(WAIT_TIMEOUT, self.ui.recv())
            .await
            .expect("no UI event in time")
            .expect("runtime dropped the UI channel")
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

pub fn install(root: &Path, id: &str, manifest: &JsonValue) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_string_pretty(manifest).unwrap(),
    )
    .unwrap();
}
