//! # ESP8266 Link Host Runner
//!
//! Supplies the platform side of the link core on a desktop machine:
//!
//! - **bridge**: tokio tasks standing in for the UART interrupts
//! - **store**: the persisted flag kept in a file
//! - **config**: JSON configuration
//! - **app**: a small echo and heartbeat application
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  TCP   ┌──────────────────────────────────────────────┐
//! │ ser2net ─ ESP│◄──────►│ esp-link-host                                │
//! └──────────────┘        │  reader/writer tasks ─ SharedSerial          │
//!                         │  Session ─ EchoApp ─ FileStore               │
//!                         └──────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod bridge;
pub mod config;
pub mod error;
pub mod store;

pub use app::{AppStats, EchoApp};
pub use bridge::{run, run_link, ChannelSink};
pub use config::HostConfig;
pub use error::HostError;
pub use store::FileStore;
