//! Host configuration, loaded from a JSON file.
//!
//! ```json
//! {
//!   "modem_addr": "127.0.0.1:2000",
//!   "state_path": "esp-link-state.bin",
//!   "log_level": "info",
//!   "heartbeat_ticks": 50,
//!   "link": {
//!     "network": { "ssid": "Elysion", "password": "secret", "port": 61499 },
//!     "timing": { "tick_period_ms": 197 }
//!   }
//! }
//! ```
//!
//! Every field is optional; missing timing values keep their defaults.

use std::path::{Path, PathBuf};

use esp_link::protocol::{Command, COMMAND_BUFFER_SIZE};
use esp_link::LinkSettings;
use heapless::String as CommandBuffer;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address of the TCP serial bridge the modem is attached to
    pub modem_addr: String,
    /// File holding the persisted "chip configured" flag
    pub state_path: PathBuf,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Ticks between heartbeat broadcasts, 0 disables them
    pub heartbeat_ticks: u32,
    pub link: LinkSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            modem_addr: "127.0.0.1:2000".into(),
            state_path: PathBuf::from("esp-link-state.bin"),
            log_level: "info".into(),
            heartbeat_ticks: 50,
            link: LinkSettings::default(),
        }
    }
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, HostError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session could never act on
    pub fn validate(&self) -> Result<(), HostError> {
        if self.link.timing.tick_period_ms == 0 {
            return Err(HostError::InvalidConfig("tick_period_ms must be positive".into()));
        }
        let mut command = CommandBuffer::<COMMAND_BUFFER_SIZE>::new();
        Command::JoinNetwork
            .encode(&self.link.network, &mut command)
            .map_err(|_| HostError::InvalidConfig("SSID and password too long for the join command".into()))?;
        Ok(())
    }
}
