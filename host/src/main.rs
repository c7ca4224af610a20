use std::path::PathBuf;

use esp_link::SharedSerial;
use esp_link_host::{bridge, HostConfig, HostError};
use log::info;

static SERIAL: SharedSerial = SharedSerial::new();

const DEFAULT_CONFIG: &str = "esp-link.json";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HostError> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = HostConfig::load(&path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    info!("esp-link-host {} (link core {})", env!("CARGO_PKG_VERSION"), esp_link::VERSION);
    info!("Configuration loaded from {}", path.display());

    let stats = bridge::run(&SERIAL, &config).await?;
    info!(
        "Received {} messages ({} bytes), {} sends ok, {} failed",
        stats.messages, stats.bytes_received, stats.sends_ok, stats.sends_failed
    );
    Ok(())
}
