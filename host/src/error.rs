use esp_link::LinkError;
use thiserror::Error;

/// Errors of the host runner
#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("State image error: {0}")]
    Store(#[from] postcard::Error),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
    #[error("Modem bridge closed the connection")]
    Disconnected,
    #[error("Task failed: {0}")]
    Task(String),
}
