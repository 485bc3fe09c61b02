//! User preferences of extensions
//!
//! Persisting preferences is the launcher's business; the runtime only needs
//! the effective values (stored value, else manifest default) when it starts
//! a process and when it routes keywords.

use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

use crate::identity::ExtensionId;
use crate::manifest::ExtensionManifest;

/// Source of user preference values and keyword overrides
pub trait PreferenceStore: Send {
    /// Effective value of every preference declared by `manifest`
    fn user_preferences(&self, ext_id: &ExtensionId, manifest: &ExtensionManifest)
        -> Map<String, JsonValue>;

    /// Effective keyword of every keyword trigger declared by `manifest`
    fn user_keywords(&self, ext_id: &ExtensionId, manifest: &ExtensionManifest)
        -> BTreeMap<String, String>;

    /// Store a preference value, returning the previous stored value
    fn set_user_preference(
        &mut self,
        ext_id: &ExtensionId,
        preference_id: &str,
        value: JsonValue,
    ) -> Option<JsonValue>;

    /// Override the keyword of a trigger
    fn set_user_keyword(&mut self, ext_id: &ExtensionId, trigger_id: &str, keyword: String);
}

#[derive(Debug, Default, Clone)]
struct StoredPreferences {
    preferences: Map<String, JsonValue>,
    keywords: BTreeMap<String, String>,
}

/// Preference store that lives as long as the runtime
#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferences {
    extensions: HashMap<ExtensionId, StoredPreferences>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn user_preferences(
        &self,
        ext_id: &ExtensionId,
        manifest: &ExtensionManifest,
    ) -> Map<String, JsonValue> {
        let stored = self.extensions.get(ext_id);
        manifest
            .preferences
            .iter()
            .map(|(id, preference)| {
                let value = stored
                    .and_then(|stored| stored.preferences.get(id))
                    .unwrap_or(&preference.default_value);
                (id.clone(), value.clone())
            })
            .collect()
    }

    fn user_keywords(
        &self,
        ext_id: &ExtensionId,
        manifest: &ExtensionManifest,
    ) -> BTreeMap<String, String> {
        let stored = self.extensions.get(ext_id);
        manifest
            .default_keywords()
            .into_iter()
            .map(|(trigger_id, default)| {
                let keyword = stored
                    .and_then(|stored| stored.keywords.get(&trigger_id))
                    .cloned()
                    .unwrap_or(default);
                (trigger_id, keyword)
            })
            .collect()
    }

    fn set_user_preference(
        &mut self,
        ext_id: &ExtensionId,
        preference_id: &str,
        value: JsonValue,
    ) -> Option<JsonValue> {
        self.extensions
            .entry(ext_id.clone())
            .or_default()
            .preferences
            .insert(preference_id.to_string(), value)
    }

    fn set_user_keyword(&mut self, ext_id: &ExtensionId, trigger_id: &str, keyword: String) {
        self.extensions
            .entry(ext_id.clone())
            .or_default()
            .keywords
            .insert(trigger_id.to_string(), keyword);
    }
}

/// Preferences snapshot handed to a process: trigger keywords folded into the
/// preference values, keyed by trigger id
pub fn preferences_snapshot(
    store: &dyn PreferenceStore,
    ext_id: &ExtensionId,
    manifest: &ExtensionManifest,
) -> Map<String, JsonValue> {
    let mut snapshot: Map<String, JsonValue> = store
        .user_keywords(ext_id, manifest)
        .into_iter()
        .map(|(trigger_id, keyword)| (trigger_id, JsonValue::String(keyword)))
        .collect();
    snapshot.extend(store.user_preferences(ext_id, manifest));
    snapshot
}
