use crate::models::Record;
use crate::realtime::store::{Filter, OrderBy, Query, RemoteStore};
use crate::Result;
use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const COINS_TABLE: &str = "coins";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATS_REFRESH_SECS: u64 = 30;

const CREATED_AT_FIELD: &str = "created_at";

// Upper bound on recent rows read to find distinct users
const ACTIVE_USER_SCAN_LIMIT: usize = 10_000;

/// Headline numbers for the landing page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoinStats {
    pub total_coins: u64,
    /// Coins created in the last 24 hours
    pub daily_coins: u64,
    /// Distinct requesting users in the last 24 hours
    pub active_users: u64,
    /// Percentage of coins that reached `completed`
    pub success_rate: f64,
}

impl CoinStats {
    /// Assemble stats from table counts and the rows of the last 24 hours
    pub fn from_counts(total: u64, completed: u64, daily: u64, recent: &[Record]) -> Self {
        let active_users: HashSet<&str> = recent
            .iter()
            .filter_map(|r| r.get_str("twitter_user"))
            .collect();

        let success_rate = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_coins: total,
            daily_coins: daily,
            active_users: active_users.len() as u64,
            success_rate,
        }
    }
}

/// Computes [`CoinStats`] from the coins table
#[derive(Clone)]
pub struct StatsService {
    store: Arc<dyn RemoteStore>,
    table: String,
}

impl StatsService {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            table: COINS_TABLE.to_string(),
        }
    }

    pub async fn fetch(&self) -> Result<CoinStats> {
        let since = (Utc::now() - Duration::hours(24)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let recent_filter = [Filter::gte(CREATED_AT_FIELD, since)];
        let completed_filter = [Filter::eq("status", STATUS_COMPLETED)];

        let recent_query = Query {
            table: self.table.clone(),
            order_by: Some(OrderBy {
                field: CREATED_AT_FIELD.to_string(),
                ascending: false,
            }),
            limit: ACTIVE_USER_SCAN_LIMIT,
            filters: recent_filter.to_vec(),
        };

        let (total, completed, daily, recent) = tokio::try_join!(
            self.store.count(&self.table, &[]),
            self.store.count(&self.table, &completed_filter),
            self.store.count(&self.table, &recent_filter),
            self.store.query(&recent_query),
        )?;

        if (recent.len() as u64) < daily {
            tracing::warn!(
                daily,
                scanned = recent.len(),
                "Active users counted over the newest rows only"
            );
        }

        Ok(CoinStats::from_counts(total, completed, daily, &recent))
    }

    /// Refresh every `every`, publishing the latest good value
    pub fn spawn_poller(self, every: std::time::Duration) -> StatsPoller {
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match self.fetch().await {
                    Ok(stats) => {
                        tracing::debug!(
                            total = stats.total_coins,
                            daily = stats.daily_coins,
                            "Refreshed coin stats"
                        );
                        if tx.send(Some(stats)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to refresh coin stats");
                    }
                }
            }
        });

        StatsPoller { rx, task }
    }
}

/// Background stats refresh; stops when dropped
pub struct StatsPoller {
    rx: watch::Receiver<Option<CoinStats>>,
    task: JoinHandle<()>,
}

impl StatsPoller {
    /// Latest stats, `None` until the first refresh succeeds
    pub fn latest(&self) -> Option<CoinStats> {
        self.rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}
