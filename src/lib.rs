// Core modules
pub mod config;
pub mod error;
pub mod models;
pub mod price;
pub mod realtime;
pub mod stats;

// Re-export commonly used types
pub use crate::config::Settings;
pub use error::Error;
pub use models::*;
pub use price::{format_market_cap, format_price, OracleConfig, PriceOracle};
pub use realtime::{CollectionState, RealtimeCollection, RemoteStore, SubscribeOptions};

// Error handling
pub type Result<T> = std::result::Result<T, Error>;
