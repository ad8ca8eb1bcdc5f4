mod clock;
mod config;
mod data;
mod engine;
mod error;
mod events;
mod ml;
mod strategies;
mod types;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use clock::{Clock, SystemClock};
use config::{load_config, render_config, AppConfig};
use data::{BinanceDataSource, DataUpdater, RollingWindowStore};
use engine::{LoopController, Orchestrator};
use events::{DataUpdateEvent, EventStore, JsonlEventStore, RetrainRecord, RetrainTrigger};
use ml::{FeatureEngine, LogisticLearner, PerformanceValidator, RetrainScheduler, TechnicalFeatureEngine};
use strategies::ConfidenceStrategy;

#[derive(Parser)]
#[command(name = "autotrader")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Self-healing ML trading bot with rolling-window data and scheduled retraining", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the autonomous update / retrain / validate / signal loop
    Run {
        /// Stop after this many cycles
        #[arg(short, long)]
        max_cycles: Option<u64>,
        /// Seconds to sleep between cycles
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Fetch the latest bars into the rolling window once
    Update,
    /// Retrain the model if due (or unconditionally with --force)
    Retrain {
        #[arg(short, long)]
        force: bool,
    },
    /// Show dataset statistics and retraining performance
    Status,
    /// Show the most recent retraining events
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs)?;

    info!("Autonomous Trading Bot v0.1.0");

    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run { max_cycles, interval } => {
            if max_cycles.is_some() {
                config.orchestrator.max_cycles = max_cycles;
            }
            if let Some(seconds) = interval {
                config.orchestrator.cycle_interval_seconds = seconds;
            }
            config.validate().map_err(error::BotError::Config)?;
            run_autonomous(Bot::new(config)).await?;
        }
        Commands::Update => {
            let bot = Bot::new(config);
            let report = bot.updater().update().await?;
            println!(
                "Updated {}: {} rows received, {} removed, {} rows in window",
                bot.config.data.symbol,
                report.rows_received,
                report.rows_removed,
                report.window.len()
            );
        }
        Commands::Retrain { force } => {
            let bot = Bot::new(config);
            let mut scheduler = bot.scheduler();
            let outcome = if force {
                scheduler.force_retrain(RetrainTrigger::Manual)
            } else {
                scheduler.retrain()
            };
            println!("{}", serde_json::to_string_pretty(&outcome.record)?);
        }
        Commands::Status => {
            show_status(&Bot::new(config))?;
        }
        Commands::History { limit } => {
            let bot = Bot::new(config);
            for record in bot.scheduler().history(limit) {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::ShowConfig => {
            print!("{}", render_config(&config)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Shared wiring for every subcommand
struct Bot {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    store: Arc<RollingWindowStore>,
    features: Arc<dyn FeatureEngine>,
    update_log: Arc<dyn EventStore<DataUpdateEvent>>,
    retrain_log: Arc<dyn EventStore<RetrainRecord>>,
}

impl Bot {
    fn new(config: AppConfig) -> Self {
        let store = Arc::new(RollingWindowStore::new(
            config.data.data_file.clone(),
            config.data.window_capacity,
        ));
        Self {
            clock: Arc::new(SystemClock),
            store,
            features: Arc::new(TechnicalFeatureEngine),
            update_log: Arc::new(JsonlEventStore::new(config.data.update_log.clone())),
            retrain_log: Arc::new(JsonlEventStore::new(config.retrain.retrain_log.clone())),
            config,
        }
    }

    fn updater(&self) -> DataUpdater {
        let source = BinanceDataSource::new(&self.config.data.base_url, &self.config.data.interval);
        DataUpdater::new(
            Arc::new(source),
            self.store.clone(),
            self.update_log.clone(),
            self.clock.clone(),
            &self.config.data.symbol,
            self.config.data.fetch_limit,
        )
    }

    fn scheduler(&self) -> RetrainScheduler {
        RetrainScheduler::new(
            self.store.clone(),
            self.features.clone(),
            Arc::new(LogisticLearner::default()),
            self.retrain_log.clone(),
            self.clock.clone(),
            self.config.retrain.clone(),
        )
    }

    fn validator(&self) -> PerformanceValidator {
        PerformanceValidator::new(self.features.clone(), &self.config.validation)
    }
}

async fn run_autonomous(bot: Bot) -> Result<()> {
    info!("AUTONOMOUS TRADING BOT STARTED");
    info!(
        "Symbol: {} | window: {} days | retrain every {} days | accuracy threshold {:.0}%",
        bot.config.data.symbol,
        bot.config.data.window_capacity,
        bot.config.retrain.retrain_interval_days,
        bot.config.validation.accuracy_threshold * 100.0
    );

    let controller = Arc::new(LoopController::new());
    let mut orchestrator = Orchestrator::new(
        bot.updater(),
        bot.store.clone(),
        bot.scheduler(),
        bot.validator(),
        bot.features.clone(),
        Box::new(ConfidenceStrategy::new(bot.config.strategy.min_confidence)),
        bot.clock.clone(),
        controller.clone(),
        &bot.config.orchestrator,
    );

    let interrupt = controller.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                interrupt.stop();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });
    info!("Press Ctrl+C to stop");

    let summary = orchestrator.run().await;
    summary.print_summary();
    Ok(())
}

fn show_status(bot: &Bot) -> Result<()> {
    let stats = bot.store.stats()?;
    println!("\n=== Dataset ===");
    println!("File:            {}", bot.store.path().display());
    println!("Rows:            {} / {}", stats.row_count, stats.window_size);
    println!("At capacity:     {}", stats.at_capacity);
    println!("Years of data:   {:.2}", stats.years_of_data);
    match &stats.date_range {
        Some(range) => println!("Date range:      {}", range),
        None => println!("Date range:      (empty)"),
    }
    match bot.updater().last_update() {
        Some(updated) => println!("Last update:     {}", updated.to_rfc3339()),
        None => println!("Last update:     never"),
    }

    let scheduler = bot.scheduler();
    let (due, reason) = scheduler.should_retrain();
    println!("\n=== Retraining ===");
    println!("Due:             {} ({})", due, reason);
    match scheduler.performance_summary() {
        Some(perf) => {
            println!("Retrainings:     {}", perf.total_retrainings);
            println!("Latest accuracy: {:.2}%", perf.latest_accuracy * 100.0);
            println!("Avg accuracy:    {:.2}%", perf.avg_accuracy * 100.0);
            println!("Range:           {:.2}% - {:.2}%", perf.min_accuracy * 100.0, perf.max_accuracy * 100.0);
            println!("Trend:           {:?}", perf.accuracy_trend);
        }
        None => println!("No successful retrainings yet"),
    }

    let latest = bot.updater().recent_events(1);
    match latest.last() {
        Some(event) => println!("\nLast data event: {} {:?}", event.timestamp.to_rfc3339(), event.event),
        None => warn!("No data updates recorded yet"),
    }
    Ok(())
}
