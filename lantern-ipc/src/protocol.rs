//! IPC protocol definitions and message types
//!
//! Host → extension traffic is a closed set of [`ExtensionEvent`]s.
//! Extension → host traffic is an [`ExtensionMessage`]: the one-off
//! registration sent right after connecting, then responses that echo the
//! event they answer together with an [`Action`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Discriminant of the registration message
pub const SOCKET_CONNECTED: &str = "socket_connected";

/// Events sent from the host to an extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionEvent {
    /// User typed `<keyword> <argument>`; args are `[argument, trigger_id]`
    #[serde(rename = "event:input_trigger")]
    InputTrigger {
        ext_id: String,
        args: (Option<String>, String),
    },

    /// A trigger without keyword input was launched; args are `[trigger_id]`
    #[serde(rename = "event:launch_trigger")]
    LaunchTrigger { ext_id: String, args: (String,) },

    /// A result item carrying an `action:activate_custom` was activated
    #[serde(rename = "event:activate_custom")]
    ActivateCustom { ext_id: String, args: (JsonValue,) },

    /// A preference changed; args are `[preference_id, new_value, old_value]`
    #[serde(rename = "event:update_preferences")]
    UpdatePreferences {
        ext_id: String,
        args: (String, JsonValue, JsonValue),
    },

    /// Snapshot of all user preferences, sent once after registration
    #[serde(rename = "event:legacy_preferences_load")]
    PreferencesLoad { args: (Map<String, JsonValue>,) },
}

impl ExtensionEvent {
    pub fn input_trigger(
        ext_id: impl Into<String>,
        argument: Option<String>,
        trigger_id: impl Into<String>,
    ) -> Self {
        ExtensionEvent::InputTrigger {
            ext_id: ext_id.into(),
            args: (argument, trigger_id.into()),
        }
    }

    pub fn launch_trigger(ext_id: impl Into<String>, trigger_id: impl Into<String>) -> Self {
        ExtensionEvent::LaunchTrigger {
            ext_id: ext_id.into(),
            args: (trigger_id.into(),),
        }
    }

    pub fn activate_custom(ext_id: impl Into<String>, data: JsonValue) -> Self {
        ExtensionEvent::ActivateCustom {
            ext_id: ext_id.into(),
            args: (data,),
        }
    }

    pub fn update_preferences(
        ext_id: impl Into<String>,
        preference_id: impl Into<String>,
        new_value: JsonValue,
        old_value: JsonValue,
    ) -> Self {
        ExtensionEvent::UpdatePreferences {
            ext_id: ext_id.into(),
            args: (preference_id.into(), new_value, old_value),
        }
    }

    pub fn preferences_load(preferences: Map<String, JsonValue>) -> Self {
        ExtensionEvent::PreferencesLoad {
            args: (preferences,),
        }
    }

    /// Extension the event is addressed to, if the event names one
    pub fn ext_id(&self) -> Option<&str> {
        match self {
            ExtensionEvent::InputTrigger { ext_id, .. }
            | ExtensionEvent::LaunchTrigger { ext_id, .. }
            | ExtensionEvent::ActivateCustom { ext_id, .. }
            | ExtensionEvent::UpdatePreferences { ext_id, .. } => Some(ext_id),
            ExtensionEvent::PreferencesLoad { .. } => None,
        }
    }

    /// Preference updates must never be coalesced with other events
    pub fn is_preference_update(&self) -> bool {
        matches!(self, ExtensionEvent::UpdatePreferences { .. })
    }
}

/// Discriminant of the registration message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationKind {
    #[serde(rename = "socket_connected", alias = "extension:socket_connected")]
    SocketConnected,
}

/// First message an extension sends after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    pub kind: RegistrationKind,
    pub ext_id: String,
}

impl Registration {
    pub fn new(ext_id: impl Into<String>) -> Self {
        Self {
            kind: RegistrationKind::SocketConnected,
            ext_id: ext_id.into(),
        }
    }
}

/// Reply to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionResponse {
    /// Echo of the event being answered
    pub event: ExtensionEvent,
    pub action: Action,
}

impl ExtensionResponse {
    pub fn new(event: ExtensionEvent, action: Action) -> Self {
        Self { event, action }
    }
}

/// Anything an extension may write to its socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionMessage {
    Registration(Registration),
    Response(ExtensionResponse),
    /// Well-formed payload of an unknown shape; logged and ignored
    Unrecognized(JsonValue),
}

impl ExtensionMessage {
    /// Identity carried by a registration message
    pub fn registration_id(&self) -> Option<&str> {
        match self {
            ExtensionMessage::Registration(registration) => Some(&registration.ext_id),
            _ => None,
        }
    }
}

impl From<Registration> for ExtensionMessage {
    fn from(registration: Registration) -> Self {
        ExtensionMessage::Registration(registration)
    }
}

impl From<ExtensionResponse> for ExtensionMessage {
    fn from(response: ExtensionResponse) -> Self {
        ExtensionMessage::Response(response)
    }
}

/// What the host should do with a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "action:render_results")]
    RenderResults { results: Vec<ResultItem> },

    #[serde(rename = "action:close")]
    Close,

    #[serde(rename = "action:do_nothing")]
    DoNothing,

    #[serde(rename = "action:clipboard_store")]
    Copy { data: String },

    /// `[script, arguments]`
    #[serde(rename = "action:legacy_run_script")]
    RunScript { data: (String, String) },

    #[serde(rename = "action:open")]
    Open { data: String },

    #[serde(rename = "action:set_query")]
    SetQuery { data: String },

    /// Sub-actions run in order
    #[serde(rename = "action:legacy_run_many")]
    ActionList { data: Vec<Action> },

    /// Round-trips `data` back to the extension as `event:activate_custom`
    #[serde(rename = "action:activate_custom")]
    ActivateCustom {
        data: JsonValue,
        #[serde(default)]
        keep_app_open: bool,
    },
}

impl Action {
    pub fn render(results: Vec<ResultItem>) -> Self {
        Action::RenderResults { results }
    }

    pub fn copy(text: impl Into<String>) -> Self {
        Action::Copy { data: text.into() }
    }

    pub fn open(target: impl Into<String>) -> Self {
        Action::Open { data: target.into() }
    }

    pub fn run_script(script: impl Into<String>, args: impl Into<String>) -> Self {
        Action::RunScript {
            data: (script.into(), args.into()),
        }
    }

    pub fn set_query(query: impl Into<String>) -> Self {
        Action::SetQuery { data: query.into() }
    }

    pub fn list(actions: Vec<Action>) -> Self {
        Action::ActionList { data: actions }
    }

    /// Whether the launcher window stays open after this action ran
    pub fn keeps_window_open(&self) -> bool {
        match self {
            Action::RenderResults { .. } | Action::DoNothing | Action::SetQuery { .. } => true,
            Action::Close | Action::Copy { .. } | Action::RunScript { .. } | Action::Open { .. } => {
                false
            }
            Action::ActionList { data } => data.iter().any(Action::keeps_window_open),
            Action::ActivateCustom { keep_app_open, .. } => *keep_app_open,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A row in the launcher's result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default = "default_true")]
    pub highlightable: bool,
    #[serde(default)]
    pub keep_app_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_enter: Option<Box<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_alt_enter: Option<Box<Action>>,
}

impl ResultItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            icon: None,
            keyword: None,
            highlightable: true,
            keep_app_open: false,
            on_enter: None,
            on_alt_enter: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_on_enter(mut self, action: Action) -> Self {
        self.on_enter = Some(Box::new(action));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_wire_shape() {
        let json = serde_json::to_value(Registration::new("com.example.foo")).unwrap();
        assert_eq!(json, json!({"type": "socket_connected", "ext_id": "com.example.foo"}));
    }

    #[test]
    fn test_registration_alias_is_accepted() {
        let msg: ExtensionMessage = serde_json::from_value(json!({
            "type": "extension:socket_connected",
            "ext_id": "com.example.foo"
        }))
        .unwrap();
        assert_eq!(msg.registration_id(), Some("com.example.foo"));
    }

    #[test]
    fn test_unknown_message_is_not_a_registration() {
        let msg: ExtensionMessage =
            serde_json::from_value(json!({"type": "hello", "ext_id": "x"})).unwrap();
        assert!(matches!(msg, ExtensionMessage::Unrecognized(_)));
        assert_eq!(msg.registration_id(), None);
    }

    #[test]
    fn test_input_trigger_args_layout() {
        let event = ExtensionEvent::input_trigger("com.example.foo", Some("abc".into()), "kw");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            json!({"type": "event:input_trigger", "ext_id": "com.example.foo", "args": ["abc", "kw"]})
        );
    }

    #[test]
    fn test_response_parses_with_nested_actions() {
        let msg: ExtensionMessage = serde_json::from_value(json!({
            "event": {"type": "event:input_trigger", "ext_id": "x", "args": [null, "kw"]},
            "action": {
                "type": "action:legacy_run_many",
                "data": [
                    {"type": "action:clipboard_store", "data": "hi"},
                    {"type": "action:render_results", "results": [
                        {"name": "One", "on_enter": {"type": "action:open", "data": "/tmp"}}
                    ]}
                ]
            }
        }))
        .unwrap();

        let ExtensionMessage::Response(response) = msg else {
            panic!("expected a response");
        };
        assert_eq!(response.event, ExtensionEvent::input_trigger("x", None, "kw"));
        let Action::ActionList { data } = &response.action else {
            panic!("expected an action list");
        };
        assert_eq!(data[0], Action::copy("hi"));
        let Action::RenderResults { results } = &data[1] else {
            panic!("expected results");
        };
        assert!(results[0].highlightable);
        assert_eq!(results[0].on_enter.as_deref(), Some(&Action::open("/tmp")));
    }

    #[test]
    fn test_keeps_window_open() {
        assert!(Action::render(vec![]).keeps_window_open());
        assert!(Action::set_query("kw ").keeps_window_open());
        assert!(!Action::Close.keeps_window_open());
        assert!(!Action::copy("x").keeps_window_open());
        assert!(!Action::list(vec![Action::Close, Action::open("x")]).keeps_window_open());
        assert!(Action::list(vec![Action::copy("x"), Action::DoNothing]).keeps_window_open());
        assert!(Action::ActivateCustom {
            data: json!(1),
            keep_app_open: true
        }
        .keeps_window_open());
    }

    #[test]
    fn test_preference_update_detection() {
        let update = ExtensionEvent::update_preferences("x", "limit", json!(5), json!(3));
        assert!(update.is_preference_update());
        assert_eq!(update.ext_id(), Some("x"));
        let load = ExtensionEvent::preferences_load(Map::new());
        assert!(!load.is_preference_update());
        assert_eq!(load.ext_id(), None);
    }
}
