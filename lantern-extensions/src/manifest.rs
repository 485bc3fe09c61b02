//! Extension manifest (`manifest.json`)
//!
//! Manifests in the wild come in two shapes. Older ones use
//! `required_api_version`/`developer_name`, put the debounce under
//! `options.query_debounce`, and list preferences as an array where
//! `keyword` entries are really triggers. Both shapes deserialize into the
//! same [`ExtensionManifest`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::ManifestError;
use crate::version::satisfies;

/// File name looked up in every extension directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Entry point run by the interpreter when a manifest has no `command`
pub const DEFAULT_ENTRY_POINT: &str = "main.py";

/// Older extensions keep working in compatibility mode if they accept this
const COMPAT_API_VERSION: &str = "2.0";

/// Longest input debounce an extension may ask for
const MAX_INPUT_DEBOUNCE: Duration = Duration::from_secs(10);

const PREFERENCE_TYPES: [&str; 5] = ["input", "checkbox", "number", "select", "text"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestTrigger {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default keyword; triggers without one are launched, not typed
    #[serde(default, alias = "default_keyword")]
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPreference {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_value: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<JsonValue>,
}

/// Parsed `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawManifest")]
pub struct ExtensionManifest {
    /// Range of host API versions the extension supports
    pub required_api_version: String,
    pub name: String,
    pub authors: String,
    pub icon: String,
    pub instructions: Option<String>,
    /// Seconds
    pub input_debounce: Option<f64>,
    pub triggers: BTreeMap<String, ManifestTrigger>,
    pub preferences: BTreeMap<String, ManifestPreference>,
    /// argv overriding the interpreter default
    pub command: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default, alias = "api_version")]
    required_api_version: String,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "developer_name")]
    authors: String,
    #[serde(default)]
    icon: String,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    input_debounce: Option<f64>,
    #[serde(default)]
    options: Option<RawOptions>,
    #[serde(default)]
    triggers: BTreeMap<String, ManifestTrigger>,
    #[serde(default)]
    preferences: Option<RawPreferences>,
    #[serde(default)]
    command: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RawOptions {
    #[serde(default)]
    query_debounce: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPreferences {
    Map(BTreeMap<String, ManifestPreference>),
    List(Vec<LegacyPreference>),
}

#[derive(Deserialize)]
struct LegacyPreference {
    id: String,
    #[serde(flatten)]
    preference: ManifestPreference,
    #[serde(default)]
    icon: Option<String>,
}

impl From<RawManifest> for ExtensionManifest {
    fn from(raw: RawManifest) -> Self {
        let mut triggers = raw.triggers;
        let preferences = match raw.preferences {
            None => BTreeMap::new(),
            Some(RawPreferences::Map(preferences)) => preferences,
            Some(RawPreferences::List(list)) => {
                let mut preferences = BTreeMap::new();
                for legacy in list {
                    let LegacyPreference {
                        id,
                        preference,
                        icon,
                    } = legacy;
                    if preference.kind == "keyword" {
                        let keyword = match &preference.default_value {
                            JsonValue::String(keyword) => keyword.clone(),
                            _ => String::new(),
                        };
                        triggers.insert(
                            id,
                            ManifestTrigger {
                                name: preference.name,
                                description: preference.description,
                                keyword,
                                icon,
                            },
                        );
                    } else {
                        preferences.insert(id, preference);
                    }
                }
                preferences
            }
        };

        let query_debounce = raw
            .options
            .and_then(|options| options.query_debounce)
            .filter(|secs| *secs > 0.0);

        ExtensionManifest {
            required_api_version: raw.required_api_version,
            name: raw.name,
            authors: raw.authors,
            icon: raw.icon,
            instructions: raw.instructions,
            input_debounce: query_debounce.or(raw.input_debounce),
            triggers,
            preferences,
            command: raw.command,
        }
    }
}

impl ExtensionManifest {
    /// Load from an extension directory or a manifest file path
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&file).map_err(|e| ManifestError::Read {
            path: file.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| match e {
            ManifestError::Parse { message, .. } => ManifestError::Parse {
                path: file.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(content).map_err(|e| ManifestError::Parse {
            path: MANIFEST_FILE.to_string(),
            message: e.to_string(),
        })
    }

    /// Check required fields, triggers and preference definitions
    pub fn validate(&self) -> Result<(), ManifestError> {
        let required = [
            ("required_api_version", self.required_api_version.is_empty()),
            ("authors", self.authors.is_empty()),
            ("name", self.name.is_empty()),
            ("icon", self.icon.is_empty()),
            ("triggers", self.triggers.is_empty()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, missing)| *missing)
            .map(|(field, _)| *field)
            .collect();
        if !missing.is_empty() {
            return Err(ManifestError::MissingFields(missing.join(", ")));
        }

        for (id, trigger) in &self.triggers {
            if trigger.name.is_empty() {
                return Err(ManifestError::InvalidTrigger(format!(
                    "\"{}\" missing non-optional field \"name\"",
                    id
                )));
            }
        }

        for (id, preference) in &self.preferences {
            validate_preference(id, preference).map_err(ManifestError::InvalidPreference)?;
        }

        if let Some(secs) = self.input_debounce {
            if secs > MAX_INPUT_DEBOUNCE.as_secs_f64() {
                return Err(ManifestError::InvalidOption(format!(
                    "\"input_debounce\" must be at most {} seconds, got {}",
                    MAX_INPUT_DEBOUNCE.as_secs(),
                    secs
                )));
            }
        }

        Ok(())
    }

    /// Ensure the host API version is inside the supported range
    ///
    /// Extensions written for API 2.0 still run, with a warning.
    pub fn check_compatibility(&self, host_version: &str) -> Result<(), ManifestError> {
        if satisfies(host_version, &self.required_api_version) {
            return Ok(());
        }
        if satisfies(COMPAT_API_VERSION, &self.required_api_version) {
            warn!(
                "Extension {} has not been updated to support API v{}, running in compatibility mode",
                self.name, host_version
            );
            return Ok(());
        }
        Err(ManifestError::Incompatible {
            name: self.name.clone(),
            host_version: host_version.to_string(),
            required: self.required_api_version.clone(),
        })
    }

    /// Debounce interval for input events, falling back to `default`
    pub fn input_debounce(&self, default: Duration) -> Duration {
        self.input_debounce
            .and_then(debounce_from_secs)
            .unwrap_or(default)
    }

    /// argv used to start the extension living in `dir`
    pub fn command_for(&self, dir: &Path, interpreter: &str) -> Vec<String> {
        match self.command.as_deref() {
            Some([program, args @ ..]) if !program.is_empty() => {
                let program_path = Path::new(program);
                let program = if program_path.is_relative() && program.contains('/') {
                    dir.join(program_path).to_string_lossy().into_owned()
                } else {
                    program.clone()
                };
                std::iter::once(program).chain(args.iter().cloned()).collect()
            }
            _ => vec![
                interpreter.to_string(),
                dir.join(DEFAULT_ENTRY_POINT).to_string_lossy().into_owned(),
            ],
        }
    }

    pub fn icon_path(&self, dir: &Path) -> Option<PathBuf> {
        (!self.icon.is_empty()).then(|| dir.join(&self.icon))
    }

    /// Manifest default keyword of every keyword trigger
    pub fn default_keywords(&self) -> BTreeMap<String, String> {
        self.triggers
            .iter()
            .filter(|(_, trigger)| !trigger.keyword.is_empty())
            .map(|(id, trigger)| (id.clone(), trigger.keyword.clone()))
            .collect()
    }

    /// Default value of every preference
    pub fn default_preferences(&self) -> Map<String, JsonValue> {
        self.preferences
            .iter()
            .map(|(id, preference)| (id.clone(), preference.default_value.clone()))
            .collect()
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn truthy_integer(value: Option<&JsonValue>) -> Result<Option<i64>, ()> {
    match value {
        Some(value) if is_truthy(value) => value.as_i64().map(Some).ok_or(()),
        _ => Ok(None),
    }
}

fn debounce_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|interval| *interval <= MAX_INPUT_DEBOUNCE)
}

fn validate_preference(id: &str, preference: &ManifestPreference) -> Result<(), String> {
    if preference.name.is_empty() {
        return Err(format!("\"{}\" missing non-optional field \"name\"", id));
    }
    if preference.kind.is_empty() {
        return Err(format!("\"{}\" missing non-optional field \"type\"", id));
    }
    if !PREFERENCE_TYPES.contains(&preference.kind.as_str()) {
        return Err(format!(
            "\"{}\" invalid type \"{}\" (should be either \"{}\")",
            id,
            preference.kind,
            PREFERENCE_TYPES.join(", ")
        ));
    }

    let is_number = preference.kind == "number";
    if preference.min.is_some() && !is_number {
        return Err(format!("\"min\" specified for \"{}\", which is not a number type", id));
    }
    if preference.max.is_some() && !is_number {
        return Err(format!("\"max\" specified for \"{}\", which is not a number type", id));
    }

    let default = &preference.default_value;
    match preference.kind.as_str() {
        "checkbox" if is_truthy(default) && !default.is_boolean() => {
            return Err(format!("\"{}\" \"default_value\" must be a boolean", id));
        }
        "number" => {
            let default = truthy_integer(Some(default))
                .map_err(|_| format!("\"{}\" default_value must be a non-decimal number", id))?;
            let min = truthy_integer(preference.min.as_ref()).map_err(|_| {
                format!("\"{}\" \"min\" value must be non-decimal number if specified", id)
            })?;
            let max = truthy_integer(preference.max.as_ref()).map_err(|_| {
                format!("\"{}\" \"max\" value must be non-decimal number if specified", id)
            })?;

            if let (Some(min), Some(max)) = (min, max) {
                if min >= max {
                    return Err(format!(
                        "\"{}\" \"min\" value must be lower than \"max\" if specified",
                        id
                    ));
                }
            }
            if let (Some(default), Some(max)) = (default, max) {
                if default > max {
                    return Err(format!("\"{}\" \"default_value\" must not be higher than \"max\"", id));
                }
            }
            if let (Some(default), Some(min)) = (default, min) {
                if default < min {
                    return Err(format!(
                        "\"{}\" \"min\" value must not be higher than \"default_value\"",
                        id
                    ));
                }
            }
        }
        "select" => match &preference.options {
            Some(JsonValue::Array(options)) if !options.is_empty() => {}
            Some(JsonValue::Array(_)) => {
                return Err(format!("\"{}\" option cannot be empty for select type", id));
            }
            _ => return Err(format!("\"{}\" options field must be a list", id)),
        },
        _ => {}
    }

    Ok(())
}
