// Token prices: API client, quote cache, oracle and display formatting
pub mod cache;
pub mod format;
pub mod jupiter;
pub mod oracle;

pub use cache::{Clock, ManualClock, QuoteCache, SystemClock};
pub use format::{format_market_cap, format_percentage, format_price, shorten_address, TOTAL_SUPPLY};
pub use jupiter::{JupiterPriceClient, PriceBatch, PriceSource};
pub use oracle::{FallbackPrices, OracleConfig, PriceOracle, CACHE_TTL_SECS};
