//! File-backed "chip configured" flag.

use std::path::{Path, PathBuf};

use esp_link::store::STATE_IMAGE_SIZE;
use esp_link::{ConfigStore, PersistedState};
use log::{error, warn};

use crate::error::HostError;

/// Keeps the [`PersistedState`] image in a small file.
///
/// A missing or unreadable file counts as "not configured", which only costs
/// one extra provisioning run.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: PersistedState,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(image) => PersistedState::from_image(&image).unwrap_or_else(|e| {
                warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                PersistedState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                warn!("Cannot read state file {}: {}", path.display(), e);
                PersistedState::default()
            }
        };
        Self { path, state }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PersistedState {
        self.state
    }

    pub fn save(&self) -> Result<(), HostError> {
        let mut buffer = [0u8; STATE_IMAGE_SIZE];
        let image = self.state.to_image(&mut buffer)?;
        std::fs::write(&self.path, image)?;
        Ok(())
    }
}

impl ConfigStore for FileStore {
    fn read_configured(&self) -> bool {
        self.state.chip_configured
    }

    fn write_configured(&mut self, configured: bool) {
        self.state.chip_configured = configured;
        if let Err(e) = self.save() {
            error!("Failed to persist state to {}: {}", self.path.display(), e);
        }
    }
}
