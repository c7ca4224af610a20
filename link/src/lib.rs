//! # ESP8266 Link Core
//!
//! Serial transport and session layer between a microcontroller and an
//! ESP8266 WiFi modem driven through its AT command set:
//!
//! - **RingBuffer**: fixed-capacity receive store with separate decode and release cursors
//! - **SharedSerial**: the only state touched from the UART interrupts
//! - **Transport**: byte-at-a-time decoder for the modem's text protocol
//! - **Session**: configuration sequence, retries and the single send slot
//!
//! ## Architecture
//!
//! ```text
//!  UART RX IRQ ──► SharedSerial ──► Transport ──► Session ──► LinkHandler
//!                  (echo check)     (events)      (states)    (application)
//!  UART TX IRQ ◄── SharedSerial ◄──────────────── Session::send
//! ```
//!
//! The application constructs one [`Session`], calls
//! [`Session::poll_tick`] from its main loop and [`Session::timed_tick`] at
//! the configured tick period. Everything runs without heap allocation.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod store;
pub mod traits;
pub mod transport;

// Re-export main types for convenience
pub use buffer::{BufferError, BufferSlice, RingBuffer, RX_BUFFER_SIZE};
pub use codec::{FrameEncoder, FrameReader};
pub use config::{LinkSettings, NetworkConfig, TimingConfig};
pub use error::{CodecError, LinkError, Status};
pub use serial::{SharedSerial, TX_BUFFER_SIZE};
pub use session::{SendError, Session, SessionState};
pub use store::{MemoryStore, PersistedState};
pub use traits::{ByteSink, ByteSource, ConfigStore, LinkHandler};
pub use transport::{Event, Payload, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
