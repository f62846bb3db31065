use crate::price::jupiter::JUPITER_PRICE_API;
use crate::price::oracle::{CACHE_TTL_SECS, RATE_LIMIT_RPM, REQUEST_TIMEOUT_SECS};
use crate::Result;
use config::{Config, Environment, Source};
use serde::Deserialize;

/// Runtime settings, read from the environment (and `.env` when present)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_key: String,
    pub price_api_url: String,
    pub price_cache_ttl_secs: u64,
    pub price_timeout_secs: u64,
    pub price_rate_limit_rpm: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_key: String::new(),
            price_api_url: JUPITER_PRICE_API.to_string(),
            price_cache_ttl_secs: CACHE_TTL_SECS,
            price_timeout_secs: REQUEST_TIMEOUT_SECS,
            price_rate_limit_rpm: RATE_LIMIT_RPM,
        }
    }
}

impl Settings {
    /// Load `.env`, then layer process environment over the defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(Environment::default().try_parsing(true))
    }

    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let config = Config::builder()
            .set_default("supabase_url", defaults.supabase_url)?
            .set_default("supabase_key", defaults.supabase_key)?
            .set_default("price_api_url", defaults.price_api_url)?
            .set_default("price_cache_ttl_secs", defaults.price_cache_ttl_secs as i64)?
            .set_default("price_timeout_secs", defaults.price_timeout_secs as i64)?
            .set_default("price_rate_limit_rpm", defaults.price_rate_limit_rpm as i64)?
            .add_source(source)
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
