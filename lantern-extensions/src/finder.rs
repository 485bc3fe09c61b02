//! Extension discovery on disk

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::identity::ExtensionId;
use crate::manifest::MANIFEST_FILE;

/// Scans extension directories in priority order
#[derive(Debug, Clone, Default)]
pub struct ExtensionFinder {
    directories: Vec<PathBuf>,
}

impl ExtensionFinder {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// A directory is an extension if it holds a manifest
    pub fn is_extension(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    /// Directory of `ext_id` in the first extension directory that has it
    pub fn locate(&self, ext_id: &ExtensionId) -> Option<PathBuf> {
        self.directories
            .iter()
            .map(|base| base.join(ext_id.as_str()))
            .find(|dir| Self::is_extension(dir))
    }

    /// Every installed extension; an id found in several directories is
    /// taken from the first one
    pub fn iterate(&self) -> BTreeMap<ExtensionId, PathBuf> {
        let mut found = BTreeMap::new();
        for base in &self.directories {
            let entries = match std::fs::read_dir(base) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping extension directory {}: {}", base.display(), e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let dir = entry.path();
                if !Self::is_extension(&dir) {
                    continue;
                }
                if let Ok(ext_id) = ExtensionId::from_dir(&dir) {
                    found.entry(ext_id).or_insert(dir);
                }
            }
        }
        found
    }
}
