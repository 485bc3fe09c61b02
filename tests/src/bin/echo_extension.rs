//! Minimal extension used by the end-to-end tests
//!
//! Input `crash` exits with code 3, `copy TEXT` answers with a copy action,
//! `env` renders the preferences handed over in the environment; anything
//! else is echoed back as a single result.

use anyhow::Result;
use lantern_ipc::{Action, ExtensionClient, ExtensionEvent, ResultItem};
use serde_json::{Map, Value as JsonValue};
use tracing::info;

const PREFERENCES_ENV: &str = "EXTENSION_PREFERENCES";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    lantern_logging::init_simple_tracing("info")?;

    let mut client = ExtensionClient::from_env().await?;
    let mut preferences = Map::new();
    info!("echo extension {} ready", client.ext_id());

    while let Some(event) = client.next_event().await {
        match &event {
            ExtensionEvent::PreferencesLoad { args: (loaded,) } => {
                preferences = loaded.clone();
            }
            ExtensionEvent::UpdatePreferences {
                args: (id, value, _),
                ..
            } => {
                preferences.insert(id.clone(), value.clone());
            }
            ExtensionEvent::InputTrigger {
                args: (argument, trigger_id),
                ..
            } => {
                let argument = argument.clone().unwrap_or_default();
                if argument == "crash" {
                    std::process::exit(3);
                }
                let action = if let Some(text) = argument.strip_prefix("copy ") {
                    Action::copy(text)
                } else if argument == "env" {
                    let env = std::env::var(PREFERENCES_ENV).unwrap_or_default();
                    Action::render(vec![ResultItem::new("env").with_description(env)])
                } else {
                    let greeting = preferences
                        .get("greeting")
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Action::render(vec![ResultItem::new(format!("{}: {}", trigger_id, argument))
                        .with_description(greeting)])
                };
                client.respond(event.clone(), action);
            }
            ExtensionEvent::LaunchTrigger {
                args: (trigger_id,),
                ..
            } => {
                let item = ResultItem::new(format!("launched {}", trigger_id));
                client.respond(event.clone(), Action::render(vec![item]));
            }
            ExtensionEvent::ActivateCustom { args: (data,), .. } => {
                let item = ResultItem::new(data.to_string());
                client.respond(event.clone(), Action::render(vec![item]));
            }
        }
    }
    info!("host closed the connection");
    Ok(())
}
