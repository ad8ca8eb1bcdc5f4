use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use super::controller::LoopController;
use super::stats::{CycleReport, DataStep, RunSummary, StopReason, TradingStats};
use crate::clock::Clock;
use crate::config::OrchestratorSettings;
use crate::data::{DataUpdater, RollingWindowStore};
use crate::events::RetrainTrigger;
use crate::ml::{FeatureEngine, PerformanceValidator, Predictor, RetrainOutcome, RetrainScheduler};
use crate::strategies::Strategy;
use crate::types::{PricePoint, SignalIntent};

/// Runs the autonomous cycle:
/// data update, scheduled retrain, validation, self-heal, signals, sleep.
///
/// Everything runs on the caller's task; a cycle's steps are awaited one
/// after another and the only suspension point is the sleep between cycles.
pub struct Orchestrator {
    updater: DataUpdater,
    store: Arc<RollingWindowStore>,
    scheduler: RetrainScheduler,
    validator: PerformanceValidator,
    features: Arc<dyn FeatureEngine>,
    strategy: Box<dyn Strategy>,
    clock: Arc<dyn Clock>,
    controller: Arc<LoopController>,
    cycle_interval: Duration,
    max_cycles: Option<u64>,
    model: Option<Box<dyn Predictor>>,
    last_daily_update: Option<NaiveDate>,
    stats: TradingStats,
    failed_cycles: u64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        updater: DataUpdater,
        store: Arc<RollingWindowStore>,
        scheduler: RetrainScheduler,
        validator: PerformanceValidator,
        features: Arc<dyn FeatureEngine>,
        strategy: Box<dyn Strategy>,
        clock: Arc<dyn Clock>,
        controller: Arc<LoopController>,
        settings: &OrchestratorSettings,
    ) -> Self {
        let model = scheduler.load_latest_model();
        if model.is_none() {
            info!("No persisted model found; signals start after the first retrain");
        }

        Self {
            updater,
            store,
            scheduler,
            validator,
            features,
            strategy,
            clock,
            controller,
            cycle_interval: Duration::from_secs(settings.cycle_interval_seconds),
            max_cycles: settings.max_cycles,
            model,
            last_daily_update: None,
            stats: TradingStats::default(),
            failed_cycles: 0,
        }
    }

    /// Cycle until stopped or `max_cycles` is reached, then return the
    /// final summary. Stop requests are honoured at the top of a cycle and
    /// cut the sleep short; a running step is never interrupted.
    pub async fn run(&mut self) -> RunSummary {
        if let Err(e) = self.controller.start() {
            warn!("{}", e);
        }
        info!(
            "Autonomous loop: interval {:?}, max cycles {}",
            self.cycle_interval,
            self.max_cycles.map(|m| m.to_string()).unwrap_or_else(|| "unlimited".to_string())
        );

        let stop_reason = loop {
            if self.controller.stop_requested() {
                break StopReason::Interrupted;
            }
            if self.max_cycles_reached() {
                break StopReason::MaxCycles;
            }

            let cycle = self.controller.cycles_completed() + 1;
            let span = info_span!("cycle", n = cycle);
            let report = self.run_cycle(cycle).instrument(span).await;
            if !report.completed() {
                self.failed_cycles += 1;
            }
            self.controller.record_cycle();

            if self.max_cycles_reached() {
                continue;
            }

            info!("Sleeping {:?} until next cycle", self.cycle_interval);
            tokio::select! {
                _ = tokio::time::sleep(self.cycle_interval) => {}
                _ = self.controller.stopped() => {}
            }
        };

        self.controller.mark_stopped();
        let summary = self.summary(stop_reason);
        info!(
            cycles = summary.cycles,
            uptime_seconds = summary.uptime_seconds,
            failed_cycles = summary.failed_cycles,
            total_signals = summary.stats.total_signals,
            buy_signals = summary.stats.buy_signals,
            sell_signals = summary.stats.sell_signals,
            last_daily_update = ?summary.last_daily_update,
            last_retrain = ?summary.last_retrain,
            "Autonomous loop finished: {}",
            summary.stop_reason
        );
        summary
    }

    fn max_cycles_reached(&self) -> bool {
        self.max_cycles
            .is_some_and(|max| self.controller.cycles_completed() >= max)
    }

    pub fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            cycles: self.controller.cycles_completed(),
            uptime_seconds: self.controller.uptime_seconds(),
            failed_cycles: self.failed_cycles,
            stats: self.stats.clone(),
            last_daily_update: self.last_daily_update,
            last_retrain: self.scheduler.last_retrain_at(),
            recent_accuracy: self.validator.recent_accuracy(),
            stop_reason,
        }
    }

    /// One full cycle. A failing step abandons the rest of the cycle; the
    /// error is logged and recorded in the report, never returned.
    pub async fn run_cycle(&mut self, cycle: u64) -> CycleReport {
        info!("CYCLE #{} - {}", cycle, self.clock.now().format("%Y-%m-%d %H:%M:%S"));
        let mut report = CycleReport::new(cycle);

        if let Err(e) = self.run_steps(&mut report).await {
            error!("Error in cycle {}: {:#}", cycle, e);
            report.error = Some(format!("{:#}", e));
        }
        report
    }

    async fn run_steps(&mut self, report: &mut CycleReport) -> Result<()> {
        report.data = Some(self.check_data_update().await);

        if self.scheduler.should_retrain().0 {
            let outcome = self.scheduler.retrain();
            report.scheduled_retrain = Some(outcome.record.status);
            self.install(outcome);
        }

        let window = self.store.load()?;
        self.validate(&window, report);

        let signals = self.generate_signals(&window)?;
        self.stats.record(&signals);
        info!(
            "Signals this cycle: {} (total {}, buy {}, sell {})",
            signals.len(),
            self.stats.total_signals,
            self.stats.buy_signals,
            self.stats.sell_signals
        );
        report.signals = signals;
        Ok(())
    }

    async fn check_data_update(&mut self) -> DataStep {
        let today = self.clock.today();
        if self.last_daily_update == Some(today) {
            return DataStep::UpToDate;
        }

        info!("Performing daily data update for {}", self.updater.symbol());
        match self.updater.update().await {
            Ok(report) => {
                self.last_daily_update = Some(today);
                DataStep::Updated {
                    rows_received: report.rows_received,
                    total_rows: report.window.len(),
                }
            }
            // marker stays put so the next cycle tries again
            Err(e) => DataStep::Failed(e.to_string()),
        }
    }

    fn validate(&mut self, window: &[PricePoint], report: &mut CycleReport) {
        // errors are logged by the validator and keep the previous accuracy
        let _ = self
            .validator
            .validate_recent_performance(window, self.model.as_deref());
        report.recent_accuracy = Some(self.validator.recent_accuracy());

        if !self.validator.needs_retraining() {
            return;
        }

        warn!(
            "Performance degraded ({:.2}% < {:.2}% after {} validations), triggering self-healing retrain",
            self.validator.recent_accuracy() * 100.0,
            self.validator.threshold() * 100.0,
            self.validator.history().len()
        );
        let outcome = self.scheduler.force_retrain(RetrainTrigger::SelfHeal);
        report.self_heal = Some(outcome.record.status);

        if outcome.is_success() {
            self.install(outcome);
            self.validator.reset_metrics();
            info!("Self-healing completed");
        } else {
            warn!(
                "Self-healing retrain failed: {}",
                outcome.record.reason.as_deref().unwrap_or("unknown error")
            );
        }
    }

    fn install(&mut self, outcome: RetrainOutcome) {
        if let Some(model) = outcome.model {
            info!("Installed freshly trained {} model", model.name());
            self.model = Some(model);
        }
    }

    fn generate_signals(&self, window: &[PricePoint]) -> Result<Vec<SignalIntent>> {
        let Some(model) = self.model.as_deref() else {
            info!("No trained model available, skipping signal generation");
            return Ok(Vec::new());
        };

        let frame = self.features.generate(window)?;
        let Some((row, features)) = frame
            .last_complete()
            .and_then(|row| row.dense().map(|features| (row, features)))
        else {
            warn!("No complete feature row to predict on");
            return Ok(Vec::new());
        };

        let prediction = model.predict(&features)?;
        info!(
            "Prediction for {}: {} (p={:.3})",
            row.date,
            if prediction.label == 1 { "UP" } else { "DOWN" },
            prediction.probability
        );

        let intents = self.strategy.decide(&[prediction])?;
        for intent in &intents {
            info!("{} signal from {}: {}", intent.side, self.strategy.name(), intent.reason);
        }
        Ok(intents.into_iter().map(|i| i.at_price(row.close)).collect())
    }
}
