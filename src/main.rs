//! Price Dealer - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use price_dealer::config::{load_trade_configs, Config, TradeConfig};
use price_dealer::dealer::{DealOutcome, DealScheduler, PaperExecutor, PriceGate};
use price_dealer::feed::FeedConnection;
use price_dealer::persistence::{AuditEntry, DealStateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Price Dealer CLI
#[derive(Parser)]
#[command(name = "price-dealer")]
#[command(version, about = "Crash-recoverable buy-then-sell dealer on a live candle stream")]
struct Cli {
    /// Config file (defaults to ./config.{yml,toml,json} if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured deal (default)
    Run,

    /// Show active deals and archived results
    Status {
        /// Print the latest audit entries of every deal
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate configuration and show where each deal would resume
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::Status { verbose }) => show_status(&config, verbose),
        Some(Commands::Check) => check(&config),
        Some(Commands::Run) | None => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!("🚀 Price Dealer v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    log_config(&config);

    let trades = load_trade_configs(&config.dealer.prices_file).with_context(|| {
        format!("Failed to load prices from {:?}", config.dealer.prices_file)
    })?;
    log_trades(&trades);

    let store = Arc::new(DealStateStore::new(&config.dealer.current_dir)?);
    info!("📂 [STORE] Active deals in {:?}", store.active_dir());

    info!("📡 [FEED] Opening feed connection");
    let connection = FeedConnection::open(&config.feed)
        .await
        .context("Failed to open feed connection")?;

    let gate = Arc::new(
        PriceGate::new(connection.feed(), config.feed.candle_interval)
            .with_max_wait(config.dealer.max_wait()),
    );
    let scheduler = DealScheduler::new(
        trades,
        store,
        gate,
        Arc::new(PaperExecutor::new()),
        config.dealer.archive_dir.clone(),
    );

    let handles = scheduler.spawn_all();
    let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    info!(deals = handles.len(), "📈 [DEAL] Run all");

    let outcomes = tokio::select! {
        outcomes = scheduler.join_all(handles) => Some(outcomes),
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Shutdown signal received, stopping deals");
            for handle in &abort_handles {
                handle.abort();
            }
            None
        }
    };

    connection.close();

    let Some(outcomes) = outcomes else {
        return Ok(());
    };

    let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
    for outcome in &outcomes {
        match outcome {
            DealOutcome::Completed(summary) => info!(
                instrument = %summary.instrument_id,
                profit = ?summary.profit,
                archive = ?summary.archived.path,
                "✅ [DEAL] Deal finished"
            ),
            DealOutcome::Failed {
                instrument_id,
                error,
            } => error!(instrument = %instrument_id, %error, "❌ [DEAL] Deal stopped"),
            DealOutcome::Aborted {
                instrument_id,
                reason,
            } => error!(instrument = %instrument_id, %reason, "❌ [DEAL] Deal task aborted"),
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} deals did not finish", failed, outcomes.len());
    }
    info!("All deals finished");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "price-dealer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("price_dealer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Sandbox: {}", config.feed.sandbox);
    info!("   Streaming URL: {}", config.feed.streaming_url());
    info!("   Candle interval: {}", config.feed.candle_interval);
    info!("   Prices file: {:?}", config.dealer.prices_file);
    info!("   Active deals: {:?}", config.dealer.current_dir);
    info!("   Archive: {:?}", config.dealer.archive_dir);
    match config.dealer.max_wait_secs {
        Some(secs) => info!("   Max wait: {}s", secs),
        None => info!("   Max wait: unbounded"),
    }
}

fn log_trades(trades: &[TradeConfig]) {
    for trade in trades {
        info!(
            key = %trade.key,
            instrument = %trade.instrument_id,
            buy = %trade.price_to_buy,
            sell = %trade.price_to_sell,
            quantity = %trade.quantity,
            "Deal configured"
        );
    }
}

/// Print active markers and archived deals.
fn show_status(config: &Config, verbose: bool) -> Result<()> {
    println!("PRICE DEALER STATUS");

    if !config.dealer.current_dir.exists() {
        println!("\nNo active-state directory at {:?}", config.dealer.current_dir);
        println!("   The dealer has not been started yet, or the path is incorrect.");
    } else {
        let store = DealStateStore::new(&config.dealer.current_dir)?;
        let active = store.list_active()?;

        println!("\nActive deals ({})", active.len());
        for marker in &active {
            let state = marker
                .record
                .last_state()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown (legacy marker)".to_string());
            println!("   ├─ {}", marker.file_name);
            println!("   │    state: {}, quotes seen: {}", state, marker.record.quote_count());
            if verbose {
                print_tail(&marker.record.entries);
            }
        }
    }

    let archived = DealStateStore::list_archived(&config.dealer.archive_dir)?;
    println!("\nArchived deals ({})", archived.len());
    for record in &archived {
        println!(
            "   ├─ {} completed {}",
            record.instrument_id,
            record.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if verbose {
            let content = price_dealer::persistence::read_record(&record.path)?;
            print_tail(&content.entries);
        }
    }

    println!();
    Ok(())
}

fn print_tail(entries: &[AuditEntry]) {
    let start = entries.len().saturating_sub(5);
    for entry in &entries[start..] {
        match serde_json::to_string(&entry.event) {
            Ok(line) => println!("   │    {} {}", entry.at.format("%H:%M:%S%.3f"), line),
            Err(e) => println!("   │    unprintable entry: {}", e),
        }
    }
}

/// Validate configuration and prices, and resolve each deal without running it.
fn check(config: &Config) -> Result<()> {
    config.validate()?;
    let trades = load_trade_configs(&config.dealer.prices_file).with_context(|| {
        format!("Failed to load prices from {:?}", config.dealer.prices_file)
    })?;
    let store = DealStateStore::new(&config.dealer.current_dir)?;

    println!("Configuration OK, {} deals", trades.len());
    let mut problems = 0;
    for trade in &trades {
        match store.resolve_current_state(&trade.instrument_id) {
            Ok((state, _)) => println!(
                "   ├─ {} ({}): {} (buy <= {}, sell >= {})",
                trade.instrument_id, trade.key, state, trade.price_to_buy, trade.price_to_sell
            ),
            Err(e) => {
                problems += 1;
                println!("   ├─ {} ({}): ERROR {}", trade.instrument_id, trade.key, e);
            }
        }
    }

    if problems > 0 {
        anyhow::bail!("{} deals cannot be resumed", problems);
    }
    Ok(())
}
