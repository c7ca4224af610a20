//! Persisted "chip configured" flag.
//!
//! The firmware keeps the flag in EEPROM, the host in a file. Both store the
//! same small postcard image so a byte-addressed backend only needs to read
//! and write [`STATE_IMAGE_SIZE`] bytes.

use serde::{Deserialize, Serialize};

use crate::traits::ConfigStore;

/// Layout version written into every image
pub const STATE_VERSION: u8 = 1;

/// Upper bound of an encoded [`PersistedState`]
pub const STATE_IMAGE_SIZE: usize = 8;

/// Everything that survives a power cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u8,
    pub chip_configured: bool,
}

impl PersistedState {
    pub const fn new(chip_configured: bool) -> Self {
        Self {
            version: STATE_VERSION,
            chip_configured,
        }
    }

    /// Encode into `buffer`, returning the used prefix
    pub fn to_image<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        postcard::to_slice(self, buffer)
    }

    /// Decode an image; unknown versions read as "not configured"
    pub fn from_image(image: &[u8]) -> Result<Self, postcard::Error> {
        let state: Self = postcard::from_bytes(image)?;
        if state.version != STATE_VERSION {
            return Ok(Self::default());
        }
        Ok(state)
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new(false)
    }
}

/// RAM-only store for targets without persistent memory and for tests
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: PersistedState,
    writes: u32,
}

impl MemoryStore {
    pub fn new(chip_configured: bool) -> Self {
        Self {
            state: PersistedState::new(chip_configured),
            writes: 0,
        }
    }

    /// Number of write operations performed so far
    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl ConfigStore for MemoryStore {
    fn read_configured(&self) -> bool {
        self.state.chip_configured
    }

    fn write_configured(&mut self, configured: bool) {
        self.state.chip_configured = configured;
        self.writes += 1;
    }
}
