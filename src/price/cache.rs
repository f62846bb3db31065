use crate::models::PriceQuote;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// Source of "now" for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Price quotes keyed by token id, valid for `ttl` after they were fetched
///
/// Cloneable; clones share entries.
#[derive(Clone)]
pub struct QuoteCache {
    entries: Arc<RwLock<HashMap<String, PriceQuote>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A quote stamped in the future (clock stepped back) counts as stale
    fn is_fresh(&self, quote: &PriceQuote, now: DateTime<Utc>) -> bool {
        let age = now - quote.fetched_at;
        age >= Duration::zero() && age < self.ttl
    }

    /// Fresh price for `token_id`, if any
    pub async fn get_fresh(&self, token_id: &str) -> Option<f64> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(token_id)
            .filter(|quote| self.is_fresh(quote, now))
            .map(|quote| quote.price)
    }

    /// Split ids into fresh cached prices and ids that need fetching
    ///
    /// Duplicate ids are collapsed; stale ids keep their first-seen order.
    pub async fn partition(&self, token_ids: &[String]) -> (HashMap<String, f64>, Vec<String>) {
        let now = self.clock.now();
        let entries = self.entries.read().await;

        let mut fresh = HashMap::new();
        let mut stale: Vec<String> = Vec::new();

        for id in token_ids {
            match entries.get(id) {
                Some(quote) if self.is_fresh(quote, now) => {
                    fresh.insert(id.clone(), quote.price);
                }
                _ => {
                    if !stale.contains(id) {
                        stale.push(id.clone());
                    }
                }
            }
        }

        (fresh, stale)
    }

    /// Record a freshly fetched price stamped with the current time
    pub async fn store(&self, token_id: &str, price: f64) -> PriceQuote {
        let quote = PriceQuote {
            price,
            fetched_at: self.clock.now(),
        };
        self.entries
            .write()
            .await
            .insert(token_id.to_string(), quote);
        quote
    }

    /// Raw entry, fresh or not
    pub async fn quote(&self, token_id: &str) -> Option<PriceQuote> {
        self.entries.read().await.get(token_id).copied()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
