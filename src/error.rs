// XBake Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum XBakeError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("File record not found: {0}")]
    FileNotFound(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Hash error: {0}")]
    Hash(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, XBakeError>;
