use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moonfeed::price::{format_market_cap, format_price, shorten_address, OracleConfig, PriceOracle};
use moonfeed::realtime::{RealtimeCollection, RemoteStore, SubscribeOptions, SupabaseStore};
use moonfeed::stats::StatsService;
use moonfeed::{Settings, Token};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const PRICE_POLL_SECS: u64 = 10;

#[derive(Parser)]
#[command(name = "moonfeed", about = "Live feeds, stats and token prices for the coin launcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow a table and log its snapshot on every change
    Watch {
        table: String,
        /// Sort field for the initial load
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        ascending: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print price and market cap (accepts mint addresses or SOL/MXS)
    Price {
        #[arg(required = true)]
        tokens: Vec<String>,
        /// Keep polling every 10 seconds
        #[arg(long)]
        follow: bool,
    },
    /// Print landing page statistics once
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;
    setup_logging();

    match cli.command {
        Command::Watch {
            table,
            order_by,
            ascending,
            limit,
        } => {
            let mut options = SubscribeOptions::new().limit(limit.unwrap_or(0));
            if let Some(field) = order_by {
                options = options.order_by(field, ascending);
            }
            watch_table(&settings, &table, options).await
        }
        Command::Price { tokens, follow } => show_prices(&settings, tokens, follow).await,
        Command::Stats => show_stats(&settings).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("moonfeed=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn supabase(settings: &Settings) -> Result<Arc<dyn RemoteStore>> {
    let store = SupabaseStore::from_settings(settings)?;
    Ok(Arc::new(store))
}

async fn watch_table(settings: &Settings, table: &str, options: SubscribeOptions) -> Result<()> {
    let store = supabase(settings)?;
    let mut collection = RealtimeCollection::subscribe(store, table, options);

    tracing::info!(table = %table, "Watching table (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = collection.changed() => {
                if !changed {
                    break;
                }
                let state = collection.state();
                if let Some(error) = &state.error {
                    tracing::error!(table = %table, error = %error, "Initial load failed");
                }
                tracing::info!(
                    table = %table,
                    rows = state.records.len(),
                    loading = state.loading,
                    "Snapshot updated"
                );
                for record in state.records.iter().take(5) {
                    tracing::info!("  {}", serde_json::to_string(record)?);
                }
            }
        }
    }

    collection.release();
    Ok(())
}

async fn show_prices(settings: &Settings, tokens: Vec<String>, follow: bool) -> Result<()> {
    let oracle = PriceOracle::new(&OracleConfig::from(settings))?;

    let ids: Vec<String> = tokens
        .iter()
        .map(|t| {
            Token::by_symbol(t)
                .map(|token| token.mint_address)
                .unwrap_or_else(|| t.clone())
        })
        .collect();

    let mut ticker = interval(Duration::from_secs(PRICE_POLL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let prices = oracle.get_prices(&ids).await;
                for (label, id) in tokens.iter().zip(&ids) {
                    let price = prices.get(id).copied().unwrap_or(0.0);
                    println!(
                        "{:<12} {:>14}  mcap {:>10}  ({})",
                        label,
                        format_price(price),
                        format_market_cap(price),
                        shorten_address(id, 4)
                    );
                }
                if !follow {
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn show_stats(settings: &Settings) -> Result<()> {
    let service = StatsService::new(supabase(settings)?);
    let stats = service.fetch().await.context("Failed to fetch stats")?;

    println!("Total coins:   {}", stats.total_coins);
    println!("Last 24h:      {}", stats.daily_coins);
    println!("Active users:  {}", stats.active_users);
    println!(
        "Success rate:  {}",
        moonfeed::price::format_percentage(stats.success_rate)
    );

    Ok(())
}
