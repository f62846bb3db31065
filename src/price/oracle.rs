use super::cache::{Clock, QuoteCache, SystemClock};
use super::jupiter::{JupiterPriceClient, PriceBatch, PriceSource, JUPITER_PRICE_API};
use crate::config::Settings;
use crate::models::{DataSource, PriceSnapshot, MXS_MINT, SOL_MINT};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const CACHE_TTL_SECS: u64 = 10;
pub const REQUEST_TIMEOUT_SECS: u64 = 5;
pub const RATE_LIMIT_RPM: u32 = 60;

/// Price oracle settings
#[derive(Debug, Clone, PartialEq)]
pub struct OracleConfig {
    pub api_url: String,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub requests_per_minute: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: JUPITER_PRICE_API.to_string(),
            cache_ttl: Duration::from_secs(CACHE_TTL_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            requests_per_minute: RATE_LIMIT_RPM,
        }
    }
}

impl From<&Settings> for OracleConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            api_url: settings.price_api_url.clone(),
            cache_ttl: Duration::from_secs(settings.price_cache_ttl_secs),
            request_timeout: Duration::from_secs(settings.price_timeout_secs),
            requests_per_minute: settings.price_rate_limit_rpm,
        }
    }
}

/// Static prices served when the live source fails
#[derive(Debug, Clone)]
pub struct FallbackPrices {
    prices: HashMap<String, f64>,
}

impl FallbackPrices {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn with(mut self, token_id: &str, price: f64) -> Self {
        self.prices.insert(token_id.to_string(), price);
        self
    }

    /// Registered fallback, or zero for unknown ids
    pub fn get(&self, token_id: &str) -> f64 {
        self.prices.get(token_id).copied().unwrap_or(0.0)
    }
}

impl Default for FallbackPrices {
    fn default() -> Self {
        Self::empty().with(SOL_MINT, 150.00).with(MXS_MINT, 0.0234)
    }
}

/// Token prices with a short-lived cache and static fallbacks
///
/// Lookups never fail: when the source is unreachable or returns garbage the
/// caller gets the fallback price and the failure is logged.
#[derive(Clone)]
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    cache: QuoteCache,
    fallbacks: FallbackPrices,
}

impl PriceOracle {
    /// Oracle backed by the Jupiter API and the wall clock
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let source = JupiterPriceClient::new(
            &config.api_url,
            config.request_timeout,
            config.requests_per_minute,
        )?;
        Ok(Self::with_clock(Arc::new(source), config, Arc::new(SystemClock)))
    }

    pub fn with_clock(
        source: Arc<dyn PriceSource>,
        config: &OracleConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = chrono::Duration::from_std(config.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(CACHE_TTL_SECS as i64));
        Self {
            source,
            cache: QuoteCache::new(ttl, clock),
            fallbacks: FallbackPrices::default(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackPrices) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn cache(&self) -> &QuoteCache {
        &self.cache
    }

    pub fn fallbacks(&self) -> &FallbackPrices {
        &self.fallbacks
    }

    /// Current price for one token
    pub async fn get_price(&self, token_id: &str) -> f64 {
        self.get_price_snapshot(token_id).await.price
    }

    /// Current price for one token, with where it came from
    pub async fn get_price_snapshot(&self, token_id: &str) -> PriceSnapshot {
        if let Some(price) = self.cache.get_fresh(token_id).await {
            return self.snapshot(token_id, price, DataSource::Cache);
        }

        let ids = [token_id.to_string()];
        let (price, source) = match self.source.fetch_prices(&ids).await {
            Ok(batch) => {
                // Unpriced or unknown ids read as zero
                let price = batch.get(token_id).copied().flatten().unwrap_or(0.0);
                self.cache.store(token_id, price).await;
                (price, DataSource::Jupiter)
            }
            Err(e) => {
                tracing::warn!(
                    token = %token_id,
                    source = self.source.name(),
                    error = %e,
                    "Price fetch failed, using fallback"
                );
                (self.fallbacks.get(token_id), DataSource::Fallback)
            }
        };

        self.snapshot(token_id, price, source)
    }

    /// Prices for many tokens with a single request for the stale ones
    pub async fn get_prices(&self, token_ids: &[String]) -> HashMap<String, f64> {
        let (mut prices, stale) = self.cache.partition(token_ids).await;
        if stale.is_empty() {
            return prices;
        }

        match self.source.fetch_prices(&stale).await {
            Ok(batch) => {
                for id in &stale {
                    let price = self.resolve_batch_entry(id, &batch).await;
                    prices.insert(id.clone(), price);
                }
            }
            Err(e) => {
                tracing::warn!(
                    tokens = stale.len(),
                    source = self.source.name(),
                    error = %e,
                    "Batch price fetch failed, using fallbacks"
                );
                for id in &stale {
                    prices.insert(id.clone(), self.fallbacks.get(id));
                }
            }
        }

        prices
    }

    /// Price for `token_id` out of a successful batch response
    ///
    /// Entries present in the response are cached (zero when unpriced); ids
    /// the response left out get their fallback and stay uncached.
    async fn resolve_batch_entry(&self, token_id: &str, batch: &PriceBatch) -> f64 {
        match batch.get(token_id) {
            Some(price) => {
                let price = price.unwrap_or(0.0);
                self.cache.store(token_id, price).await;
                price
            }
            None => {
                tracing::warn!(
                    token = %token_id,
                    source = self.source.name(),
                    "No price entry in batch response, using fallback"
                );
                self.fallbacks.get(token_id)
            }
        }
    }

    fn snapshot(&self, token_id: &str, price: f64, source: DataSource) -> PriceSnapshot {
        PriceSnapshot {
            token: token_id.to_string(),
            price,
            source,
            timestamp: self.cache.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::cache::ManualClock;
    use mockito::{Matcher, Server};

    fn oracle(server: &Server, clock: &ManualClock) -> PriceOracle {
        let config = OracleConfig {
            api_url: format!("{}/price/v2", server.url()),
            requests_per_minute: 600,
            ..OracleConfig::default()
        };
        let source =
            JupiterPriceClient::new(&config.api_url, config.request_timeout, config.requests_per_minute)
                .unwrap();
        PriceOracle::with_clock(Arc::new(source), &config, Arc::new(clock.clone()))
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fallback_registry() {
        let fallbacks = FallbackPrices::default();
        assert_eq!(fallbacks.get(SOL_MINT), 150.00);
        assert_eq!(fallbacks.get(MXS_MINT), 0.0234);
        assert_eq!(fallbacks.get("unknown"), 0.0);

        let custom = FallbackPrices::empty().with("X", 2.5);
        assert_eq!(custom.get("X"), 2.5);
        assert_eq!(custom.get(SOL_MINT), 0.0);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            price_cache_ttl_secs: 30,
            price_timeout_secs: 2,
            ..Settings::default()
        };
        let config = OracleConfig::from(&settings);
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.api_url, JUPITER_PRICE_API);
    }

    #[tokio::test]
    async fn test_cached_within_ttl() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::UrlEncoded("ids".into(), SOL_MINT.into()))
            .with_status(200)
            .with_body(format!(r#"{{"data":{{"{}":{{"price":"148.5"}}}}}}"#, SOL_MINT))
            .expect(1)
            .create_async()
            .await;

        let clock = ManualClock::default();
        let oracle = oracle(&server, &clock);

        assert_eq!(oracle.get_price(SOL_MINT).await, 148.5);
        clock.advance(chrono::Duration::seconds(9));
        let second = oracle.get_price_snapshot(SOL_MINT).await;

        assert_eq!(second.price, 148.5);
        assert_eq!(second.source, DataSource::Cache);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refetch_after_ttl() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(r#"{{"data":{{"{}":{{"price":149}}}}}}"#, SOL_MINT))
            .expect(2)
            .create_async()
            .await;

        let clock = ManualClock::default();
        let oracle = oracle(&server, &clock);

        oracle.get_price(SOL_MINT).await;
        let first = oracle.cache().quote(SOL_MINT).await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        let snapshot = oracle.get_price_snapshot(SOL_MINT).await;
        let second = oracle.cache().quote(SOL_MINT).await.unwrap();

        assert_eq!(snapshot.source, DataSource::Jupiter);
        assert!(second.fetched_at > first.fetched_at);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_returns_fallback_without_caching() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let clock = ManualClock::default();
        let oracle = oracle(&server, &clock);

        assert_eq!(oracle.get_price(SOL_MINT).await, 150.00);
        assert_eq!(oracle.get_price(MXS_MINT).await, 0.0234);
        assert_eq!(oracle.get_price("unknown-mint").await, 0.0);
        assert!(oracle.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_network_error_returns_fallback() {
        let config = OracleConfig {
            api_url: "http://127.0.0.1:1/price/v2".to_string(),
            ..OracleConfig::default()
        };
        let oracle = PriceOracle::new(&config).unwrap();

        let snapshot = oracle.get_price_snapshot(SOL_MINT).await;
        assert_eq!(snapshot.price, 150.00);
        assert_eq!(snapshot.source, DataSource::Fallback);
    }

    #[tokio::test]
    async fn test_malformed_body_returns_fallback() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>rate limited</html>")
            .create_async()
            .await;

        let oracle = oracle(&server, &ManualClock::default());
        assert_eq!(oracle.get_price(MXS_MINT).await, 0.0234);
        assert!(oracle.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_price_field_is_zero() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(r#"{{"data":{{"{}":{{"id":"{}"}}}}}}"#, MXS_MINT, MXS_MINT))
            .create_async()
            .await;

        let oracle = oracle(&server, &ManualClock::default());
        assert_eq!(oracle.get_price(MXS_MINT).await, 0.0);
        assert_eq!(oracle.cache().quote(MXS_MINT).await.unwrap().price, 0.0);
    }

    #[tokio::test]
    async fn test_unpriced_token_is_cached_as_zero() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::UrlEncoded("ids".into(), "NewMint".into()))
            .with_status(200)
            .with_body(r#"{"data":{"NewMint":null}}"#)
            .expect(1)
            .create_async()
            .await;

        let clock = ManualClock::default();
        let oracle = oracle(&server, &clock);

        for _ in 0..3 {
            assert_eq!(oracle.get_price("NewMint").await, 0.0);
            clock.advance(chrono::Duration::seconds(3));
        }

        assert_eq!(oracle.cache().quote("NewMint").await.unwrap().price, 0.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_absent_entry_is_zero_for_single_lookup() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let oracle = oracle(&server, &ManualClock::default());
        let snapshot = oracle.get_price_snapshot(SOL_MINT).await;
        let again = oracle.get_price_snapshot(SOL_MINT).await;

        assert_eq!(snapshot.price, 0.0);
        assert_eq!(snapshot.source, DataSource::Jupiter);
        assert_eq!(again.source, DataSource::Cache);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_batch_fetches_only_stale_ids() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::UrlEncoded("ids".into(), "a".into()))
            .with_status(200)
            .with_body(r#"{"data":{"a":{"price":"1.25"}}}"#)
            .expect(1)
            .create_async()
            .await;
        let batch = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::UrlEncoded(
                "ids".into(),
                format!("b,{}", MXS_MINT),
            ))
            .with_status(200)
            .with_body(r#"{"data":{"b":{"price":"2.5"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let oracle = oracle(&server, &ManualClock::default());
        oracle.get_price("a").await;

        let prices = oracle.get_prices(&ids(&["a", "b", MXS_MINT])).await;

        assert_eq!(prices.len(), 3);
        assert_eq!(prices["a"], 1.25);
        assert_eq!(prices["b"], 2.5);
        // Missing from the response: registered fallback, not cached
        assert_eq!(prices[MXS_MINT], 0.0234);
        assert!(oracle.cache().quote(MXS_MINT).await.is_none());

        first.assert_async().await;
        batch.assert_async().await;
    }

    #[tokio::test]
    async fn test_batch_all_cached_skips_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{"a":{"price":"3"},"b":{"price":"4"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let oracle = oracle(&server, &ManualClock::default());
        let first = oracle.get_prices(&ids(&["a", "b"])).await;
        let second = oracle.get_prices(&ids(&["b", "a"])).await;

        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_batch_failure_keeps_fresh_prices() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::UrlEncoded("ids".into(), "a".into()))
            .with_status(200)
            .with_body(r#"{"data":{"a":{"price":"7"}}}"#)
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/price/v2")
            .match_query(Matcher::UrlEncoded("ids".into(), SOL_MINT.into()))
            .with_status(502)
            .create_async()
            .await;

        let oracle = oracle(&server, &ManualClock::default());
        oracle.get_price("a").await;
        ok.assert_async().await;

        let prices = oracle.get_prices(&ids(&["a", SOL_MINT])).await;
        assert_eq!(prices["a"], 7.0);
        assert_eq!(prices[SOL_MINT], 150.00);
    }
}
