use crate::error::Error;
use crate::Result;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// Jupiter Price API v2
// Docs: https://dev.jup.ag/docs/price-api
pub const JUPITER_PRICE_API: &str = "https://lite-api.jup.ag/price/v2";
const DEFAULT_RATE_LIMIT_RPM: u32 = 60;

type PriceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Prices for a batch of ids
///
/// An id missing from the map had no entry in the response. A null entry or
/// one without a price field maps to `None`.
pub type PriceBatch = HashMap<String, Option<f64>>;

/// External price API
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_prices(&self, token_ids: &[String]) -> Result<PriceBatch>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: HashMap<String, Option<PriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    #[serde(default)]
    price: Option<RawPrice>,
}

// v2 reports prices as decimal strings; older responses used numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPrice {
    Number(f64),
    Text(String),
}

impl RawPrice {
    fn to_f64(&self) -> Result<f64> {
        let price = match self {
            RawPrice::Number(n) => *n,
            RawPrice::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::Malformed(format!("unparsable price {:?}", s)))?,
        };
        if !price.is_finite() || price < 0.0 {
            return Err(Error::Malformed(format!("invalid price {}", price)));
        }
        Ok(price)
    }
}

/// Client for the Jupiter price API
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct JupiterPriceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<PriceRateLimiter>,
}

impl JupiterPriceClient {
    pub fn new(base_url: &str, timeout: Duration, requests_per_minute: u32) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let rpm = NonZeroU32::new(requests_per_minute)
            .or_else(|| NonZeroU32::new(DEFAULT_RATE_LIMIT_RPM))
            .unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    fn parse_batch(body: &str) -> Result<PriceBatch> {
        let response: PriceResponse = serde_json::from_str(body)?;

        let mut batch = PriceBatch::new();
        for (id, entry) in response.data {
            let price = entry
                .and_then(|e| e.price)
                .as_ref()
                .map(RawPrice::to_f64)
                .transpose()?;
            batch.insert(id, price);
        }
        Ok(batch)
    }
}

#[async_trait::async_trait]
impl PriceSource for JupiterPriceClient {
    fn name(&self) -> &'static str {
        "Jupiter"
    }

    async fn fetch_prices(&self, token_ids: &[String]) -> Result<PriceBatch> {
        self.rate_limiter.until_ready().await;

        let ids = token_ids.join(",");
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("ids", ids.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: self.base_url.clone(),
            });
        }

        let body = response.text().await?;
        let batch = Self::parse_batch(&body)?;

        tracing::debug!(ids = %ids, entries = batch.len(), "Fetched Jupiter prices");

        Ok(batch)
    }
}
