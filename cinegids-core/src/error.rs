use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limit wait timed out for host: {host}")]
    RateLimitTimeout { host: String },

    #[error("Authentication rejected with status {status}")]
    AuthRejected { status: u16 },

    #[error("Bot protection detected on {engine}")]
    BotProtection { engine: String },

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LookupError>;
