use thiserror::Error;

/// Errors surfaced by the store adapters, the price client and configuration loading
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// True for failures caused by the shape of a response rather than transport
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed(_) | Error::Json(_))
    }
}
