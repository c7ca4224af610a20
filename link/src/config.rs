//! Network parameters and timing of the session state machine.

use heapless::String;
use serde::{Deserialize, Serialize};

/// Maximum SSID length accepted by the modem
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA passphrase length accepted by the modem
pub const MAX_PASSWORD_LEN: usize = 64;

/// Default server port (IEC 61499 communication)
pub const DEFAULT_SERVER_PORT: u16 = 61499;

/// Wireless network joined during first-boot provisioning and the port the
/// modem listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ssid: String<MAX_SSID_LEN>,
    pub password: String<MAX_PASSWORD_LEN>,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

impl NetworkConfig {
    /// Build a configuration, `None` if a field exceeds the modem limits
    pub fn new(ssid: &str, password: &str, port: u16) -> Option<Self> {
        Some(Self {
            ssid: String::try_from(ssid).ok()?,
            password: String::try_from(password).ok()?,
            port,
        })
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Delays used by the session, expressed in milliseconds and converted to
/// ticks of the periodic [`crate::Session::timed_tick`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Period at which `timed_tick` is invoked
    pub tick_period_ms: u32,
    /// Settle time after power-up before the first command
    pub settle_ms: u32,
    /// Wait after the reset that follows network provisioning
    pub reset_ms: u32,
    /// Wait before a short retry
    pub retry_ms: u32,
    /// Wait once the short retries are exhausted
    pub long_retry_ms: u32,
    /// Short retries before falling back to the long delay
    pub short_retries: u8,
}

impl TimingConfig {
    /// Convert milliseconds to ticks, rounding up
    pub fn ticks(&self, ms: u32) -> u32 {
        let period = self.tick_period_ms.max(1);
        ms.div_ceil(period)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 197,
            settle_ms: 1_000,
            reset_ms: 1_500,
            retry_ms: 1_500,
            long_retry_ms: 180_000,
            short_retries: 3,
        }
    }
}

/// Everything the session needs besides its collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}
