//! Lantern extension runtime
//!
//! This crate discovers installed extensions, starts and supervises their
//! processes, accepts their socket registrations, routes launcher queries to
//! them by keyword and correlates their responses with the query that is
//! currently shown.

pub mod controller;
pub mod correlator;
pub mod debounce;
pub mod error;
pub mod error_extractor;
pub mod finder;
pub mod identity;
pub mod manifest;
pub mod preferences;
pub mod process;
pub mod router;
pub mod runtime;
pub mod server;
pub mod supervisor;
pub mod timer;
pub mod version;

// Re-export main types
pub use controller::{Controller, ControllerRegistry};
pub use correlator::{Correlator, UiEvent, UiEventReceiver, UiEventSender, LOADING_TEXT};
pub use error::{
    ErrorKind, ExtensionError, IdentityError, ManifestError, RuntimeError, RuntimeResult,
};
pub use finder::ExtensionFinder;
pub use identity::ExtensionId;
pub use manifest::{ExtensionManifest, ManifestPreference, ManifestTrigger, MANIFEST_FILE};
pub use preferences::{preferences_snapshot, InMemoryPreferences, PreferenceStore};
pub use router::{route, Query};
pub use runtime::{ExtensionRuntime, RuntimeHandle, RuntimeStatus};
pub use server::RegistrationServer;
pub use supervisor::{Supervisor, SupervisorSettings};
