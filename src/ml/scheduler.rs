use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::features::FeatureEngine;
use super::model::{Learner, Predictor};
use super::registry::ModelRegistry;
use super::split::train_test_split;
use crate::clock::Clock;
use crate::config::RetrainSettings;
use crate::data::RollingWindowStore;
use crate::error::{EventStoreError, InsufficientDataError};
use crate::events::{EventStore, RetrainRecord, RetrainStatus, RetrainTrigger};

/// Time of the last successful retrain, as recovered from the log
#[derive(Debug, Clone, PartialEq)]
pub enum LastRetrain {
    Never,
    At(DateTime<Utc>),
    /// The log's final entry could not be parsed
    Unreadable(String),
}

pub struct RetrainOutcome {
    pub record: RetrainRecord,
    /// Present only for `success`
    pub model: Option<Box<dyn Predictor>>,
}

impl RetrainOutcome {
    pub fn is_success(&self) -> bool {
        self.record.is_success()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AccuracyTrend {
    Improving,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_retrainings: usize,
    pub avg_accuracy: f64,
    pub max_accuracy: f64,
    pub min_accuracy: f64,
    pub latest_accuracy: f64,
    pub accuracy_trend: AccuracyTrend,
}

/// Decides when the model is due for retraining and runs the
/// load, engineer, split, fit, evaluate and persist sequence.
pub struct RetrainScheduler {
    store: Arc<RollingWindowStore>,
    features: Arc<dyn FeatureEngine>,
    learner: Arc<dyn Learner>,
    registry: ModelRegistry,
    log: Arc<dyn EventStore<RetrainRecord>>,
    clock: Arc<dyn Clock>,
    settings: RetrainSettings,
    last_retrain: LastRetrain,
    last_test_accuracy: Option<f64>,
}

impl RetrainScheduler {
    pub fn new(
        store: Arc<RollingWindowStore>,
        features: Arc<dyn FeatureEngine>,
        learner: Arc<dyn Learner>,
        log: Arc<dyn EventStore<RetrainRecord>>,
        clock: Arc<dyn Clock>,
        settings: RetrainSettings,
    ) -> Self {
        let (last_retrain, last_test_accuracy) = recover_state(log.as_ref());
        let registry = ModelRegistry::new(settings.model_dir.clone());
        Self {
            store,
            features,
            learner,
            registry,
            log,
            clock,
            settings,
            last_retrain,
            last_test_accuracy,
        }
    }

    pub fn last_retrain_at(&self) -> Option<DateTime<Utc>> {
        match self.last_retrain {
            LastRetrain::At(ts) => Some(ts),
            _ => None,
        }
    }

    /// Restore the newest persisted model so predictions work before the
    /// first retrain of this process
    pub fn load_latest_model(&self) -> Option<Box<dyn Predictor>> {
        match self.registry.load_latest(self.learner.as_ref()) {
            Ok(found) => found.map(|(_, model)| model),
            Err(e) => {
                warn!("Could not load persisted model: {}", e);
                None
            }
        }
    }

    pub fn should_retrain(&self) -> (bool, String) {
        match &self.last_retrain {
            LastRetrain::Never => (true, "first retraining (no history)".to_string()),
            LastRetrain::Unreadable(raw) => {
                warn!("Retrain log timestamp unreadable: {}", raw);
                (true, "timestamp corruption, forcing retrain".to_string())
            }
            LastRetrain::At(last) => {
                let elapsed_days = (self.clock.now() - *last).num_days();
                if elapsed_days >= self.settings.retrain_interval_days {
                    (true, format!("weekly schedule ({} days since last retrain)", elapsed_days))
                } else {
                    (false, format!("not yet (only {} days since last retrain)", elapsed_days))
                }
            }
        }
    }

    /// Scheduled retrain; re-checks the schedule and returns a `skipped`
    /// record when nothing is due
    pub fn retrain(&mut self) -> RetrainOutcome {
        let (due, reason) = self.should_retrain();
        info!("Retrain check: {}", reason);
        if !due {
            return RetrainOutcome {
                record: RetrainRecord::skipped(self.clock.now(), RetrainTrigger::Scheduled, reason),
                model: None,
            };
        }
        self.attempt(RetrainTrigger::Scheduled)
    }

    /// Retrain now regardless of the schedule
    pub fn force_retrain(&mut self, trigger: RetrainTrigger) -> RetrainOutcome {
        info!("Forced retrain ({:?})", trigger);
        self.attempt(trigger)
    }

    fn attempt(&mut self, trigger: RetrainTrigger) -> RetrainOutcome {
        info!("STARTING MODEL RETRAINING");

        let outcome = match self.train_and_persist(trigger) {
            Ok((record, model)) => {
                self.last_retrain = LastRetrain::At(record.timestamp);
                self.last_test_accuracy = record.test_accuracy;
                info!(
                    "Retraining completed: train={:.4} test={:.4} improvement={}",
                    record.train_accuracy.unwrap_or_default(),
                    record.test_accuracy.unwrap_or_default(),
                    record
                        .improvement
                        .map(|i| format!("{:+.4}", i))
                        .unwrap_or_else(|| "n/a".to_string())
                );
                RetrainOutcome { record, model: Some(model) }
            }
            Err(e) => {
                // the schedule is not advanced; the next cycle retries
                warn!("Retraining failed: {}", e);
                RetrainOutcome {
                    record: RetrainRecord::failed(self.clock.now(), trigger, e.to_string()),
                    model: None,
                }
            }
        };

        if let Err(e) = self.log.append(&outcome.record) {
            error!("Error logging retraining event: {}", e);
        }
        outcome
    }

    fn train_and_persist(&self, trigger: RetrainTrigger) -> Result<(RetrainRecord, Box<dyn Predictor>)> {
        let window = self.store.load()?;
        info!("Loaded {} rows of data", window.len());

        let frame = self.features.generate(&window)?.drop_incomplete();
        info!("After feature engineering: {} rows", frame.len());
        if frame.len() < self.settings.min_usable_rows {
            return Err(InsufficientDataError {
                usable: frame.len(),
                required: self.settings.min_usable_rows,
            }
            .into());
        }

        let set = frame.labeled();
        let split = train_test_split(&set, self.settings.test_ratio, self.settings.split_seed);
        info!(
            "Features: {}, train set: {}, test set: {}",
            frame.feature_count(),
            split.y_train.len(),
            split.y_test.len()
        );

        let learner = self.learner.as_ref();
        let model = catch_unwind(AssertUnwindSafe(|| learner.train(&split.x_train, &split.y_train)))
            .map_err(|payload| match panic_message(payload.as_ref()) {
                Some(msg) => anyhow!("model training panicked: {}", msg),
                None => anyhow!("model training panicked"),
            })??;

        let train_accuracy = model.evaluate(&split.x_train, &split.y_train)?;
        let test_accuracy = model.evaluate(&split.x_test, &split.y_test)?;
        let model_reference = self.registry.save(model.as_ref())?;

        let record = RetrainRecord {
            timestamp: self.clock.now(),
            status: RetrainStatus::Success,
            trigger,
            train_accuracy: Some(train_accuracy),
            test_accuracy: Some(test_accuracy),
            train_samples: Some(split.y_train.len()),
            test_samples: Some(split.y_test.len()),
            feature_count: Some(frame.feature_count()),
            model_reference: Some(model_reference),
            improvement: self.last_test_accuracy.map(|prev| test_accuracy - prev),
            reason: None,
        };
        Ok((record, model))
    }

    /// Most recent `limit` records, oldest first
    pub fn history(&self, limit: usize) -> Vec<RetrainRecord> {
        self.log.tail(limit).unwrap_or_else(|e| {
            error!("Error reading retraining history: {}", e);
            Vec::new()
        })
    }

    /// Test-accuracy statistics over the last 100 successful retrains
    pub fn performance_summary(&self) -> Option<PerformanceSummary> {
        let accuracies: Vec<f64> = self
            .history(100)
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.test_accuracy)
            .collect();

        let first = *accuracies.first()?;
        let latest = *accuracies.last()?;
        Some(PerformanceSummary {
            total_retrainings: accuracies.len(),
            avg_accuracy: accuracies.iter().sum::<f64>() / accuracies.len() as f64,
            max_accuracy: accuracies.iter().copied().fold(f64::MIN, f64::max),
            min_accuracy: accuracies.iter().copied().fold(f64::MAX, f64::min),
            latest_accuracy: latest,
            accuracy_trend: if accuracies.len() > 1 && latest > first {
                AccuracyTrend::Improving
            } else {
                AccuracyTrend::Stable
            },
        })
    }
}

/// Text of a `panic!` payload, when it carries one
fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// Last successful retrain time and its test accuracy
fn recover_state(log: &dyn EventStore<RetrainRecord>) -> (LastRetrain, Option<f64>) {
    if let Err(e) = log.read_last() {
        return match e {
            EventStoreError::Corrupt { .. } => (LastRetrain::Unreadable(e.to_string()), None),
            other => {
                warn!("Could not load retraining history: {}", other);
                (LastRetrain::Never, None)
            }
        };
    }

    match log.read_all() {
        Ok(records) => {
            info!("Loaded retraining history: {} entries", records.len());
            records
                .iter()
                .rev()
                .find(|r| r.is_success())
                .map(|r| (LastRetrain::At(r.timestamp), r.test_accuracy))
                .unwrap_or((LastRetrain::Never, None))
        }
        Err(e) => {
            warn!("Could not load retraining history: {}", e);
            (LastRetrain::Never, None)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{JsonlEventStore, MemoryEventStore};
    use crate::ml::features::tests::trending_bars;
    use crate::ml::features::TechnicalFeatureEngine;
    use crate::ml::model::tests::FixedPredictor;
    use ndarray::{Array1, Array2};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a `FixedPredictor` and counts how often it was asked to train
    pub(crate) struct CountingLearner {
        pub label: u8,
        pub calls: AtomicUsize,
    }

    impl CountingLearner {
        pub(crate) fn new(label: u8) -> Self {
            Self { label, calls: AtomicUsize::new(0) }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Learner for CountingLearner {
        fn train(&self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<Box<dyn Predictor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedPredictor { label: self.label }))
        }

        fn load(&self, _json: &str) -> Result<Box<dyn Predictor>> {
            Ok(Box::new(FixedPredictor { label: self.label }))
        }
    }

    pub(crate) fn success_record(ts: DateTime<Utc>, test_accuracy: f64) -> RetrainRecord {
        RetrainRecord {
            timestamp: ts,
            status: RetrainStatus::Success,
            trigger: RetrainTrigger::Scheduled,
            train_accuracy: Some(test_accuracy),
            test_accuracy: Some(test_accuracy),
            train_samples: Some(70),
            test_samples: Some(30),
            feature_count: Some(10),
            model_reference: Some("models/model_1.0.0.json".to_string()),
            improvement: None,
            reason: None,
        }
    }

    pub(crate) fn settings_in(dir: &tempfile::TempDir) -> RetrainSettings {
        RetrainSettings {
            model_dir: dir.path().join("models"),
            retrain_log: dir.path().join("retraining_log.jsonl"),
            ..RetrainSettings::default()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        log: Arc<MemoryEventStore<RetrainRecord>>,
        learner: Arc<CountingLearner>,
        scheduler: RetrainScheduler,
    }

    fn fixture(bars: usize, history: Vec<RetrainRecord>) -> Fixture {
        let learner = Arc::new(CountingLearner::new(1));
        let (dir, clock, log, scheduler) = build(bars, history, learner.clone());
        Fixture { _dir: dir, clock, log, learner, scheduler }
    }

    fn build(
        bars: usize,
        history: Vec<RetrainRecord>,
        learner: Arc<dyn Learner>,
    ) -> (tempfile::TempDir, Arc<ManualClock>, Arc<MemoryEventStore<RetrainRecord>>, RetrainScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RollingWindowStore::new(dir.path().join("prices.csv"), 494));
        if bars > 0 {
            store.ingest(trending_bars(bars, 1000, 1)).unwrap();
        }
        let clock = Arc::new(ManualClock::at("2024-06-15"));
        let log: Arc<MemoryEventStore<RetrainRecord>> = Arc::new(MemoryEventStore::new());
        for record in &history {
            log.append(record).unwrap();
        }
        let scheduler = RetrainScheduler::new(
            store,
            Arc::new(TechnicalFeatureEngine),
            learner,
            log.clone(),
            clock.clone(),
            settings_in(&dir),
        );
        (dir, clock, log, scheduler)
    }

    /// Learner whose training step errors or panics
    enum BrokenLearner {
        Errors(&'static str),
        Panics,
        PanicsFormatted(u32),
    }

    impl Learner for BrokenLearner {
        fn train(&self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<Box<dyn Predictor>> {
            match self {
                BrokenLearner::Errors(msg) => Err(anyhow!(*msg)),
                BrokenLearner::Panics => panic!("kaboom"),
                BrokenLearner::PanicsFormatted(code) => panic!("solver exploded with code {}", code),
            }
        }

        fn load(&self, json: &str) -> Result<Box<dyn Predictor>> {
            Err(anyhow!("cannot load {} bytes", json.len()))
        }
    }

    fn assert_failed_attempt(learner: BrokenLearner, expected_reason: &str) {
        let (_dir, _clock, log, mut scheduler) = build(200, vec![], Arc::new(learner));

        let outcome = scheduler.retrain();
        assert_eq!(outcome.record.status, RetrainStatus::Failed);
        assert_eq!(outcome.record.reason.as_deref(), Some(expected_reason));
        assert!(outcome.record.test_accuracy.is_none());
        assert!(outcome.model.is_none());

        assert!(scheduler.should_retrain().0);
        assert_eq!(scheduler.last_retrain, LastRetrain::Never);
        assert_eq!(log.len(), 1);
        assert_eq!(log.read_last().unwrap().unwrap().status, RetrainStatus::Failed);
    }

    #[test]
    fn test_learner_error_is_recorded_as_failure() {
        assert_failed_attempt(BrokenLearner::Errors("solver diverged"), "solver diverged");
    }

    #[test]
    fn test_learner_panic_is_contained_with_its_message() {
        assert_failed_attempt(BrokenLearner::Panics, "model training panicked: kaboom");
        assert_failed_attempt(
            BrokenLearner::PanicsFormatted(7),
            "model training panicked: solver exploded with code 7",
        );
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(literal.as_ref()), Some("static text"));
        assert_eq!(panic_message(owned.as_ref()), Some("owned text"));
        assert_eq!(panic_message(other.as_ref()), None);
    }

    #[test]
    fn test_first_retrain_without_history() {
        let f = fixture(0, vec![]);
        let (due, reason) = f.scheduler.should_retrain();
        assert!(due);
        assert!(reason.starts_with("first retraining"));
    }

    #[test]
    fn test_weekly_boundary() {
        let now = ManualClock::at("2024-06-15").now();

        let six_days = fixture(0, vec![success_record(now - chrono::Duration::days(6), 0.6)]);
        let (due, reason) = six_days.scheduler.should_retrain();
        assert!(!due);
        assert!(reason.starts_with("not yet"));

        let seven_days = fixture(0, vec![success_record(now - chrono::Duration::days(7), 0.6)]);
        let (due, reason) = seven_days.scheduler.should_retrain();
        assert!(due);
        assert!(reason.starts_with("weekly schedule"));
    }

    #[test]
    fn test_boundary_moves_with_clock() {
        let now = ManualClock::at("2024-06-15").now();
        let f = fixture(0, vec![success_record(now - chrono::Duration::days(6), 0.6)]);
        assert!(!f.scheduler.should_retrain().0);
        f.clock.advance(chrono::Duration::days(1));
        assert!(f.scheduler.should_retrain().0);
    }

    #[test]
    fn test_recovery_ignores_trailing_failures() {
        let now = ManualClock::at("2024-06-15").now();
        let f = fixture(
            0,
            vec![
                success_record(now - chrono::Duration::days(10), 0.6),
                success_record(now - chrono::Duration::days(2), 0.62),
                RetrainRecord::failed(now - chrono::Duration::days(1), RetrainTrigger::SelfHeal, "boom"),
            ],
        );
        assert_eq!(f.scheduler.last_retrain_at(), Some(now - chrono::Duration::days(2)));
        assert!(!f.scheduler.should_retrain().0);
    }

    #[test]
    fn test_corrupt_log_forces_retrain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retraining_log.jsonl");
        std::fs::write(&path, "{\"timestamp\":\"yesterday-ish\",\"status\":\"success\"}\n").unwrap();

        let scheduler = RetrainScheduler::new(
            Arc::new(RollingWindowStore::new(dir.path().join("prices.csv"), 494)),
            Arc::new(TechnicalFeatureEngine),
            Arc::new(CountingLearner::new(1)),
            Arc::new(JsonlEventStore::new(&path)),
            Arc::new(ManualClock::at("2024-06-15")),
            settings_in(&dir),
        );

        assert!(matches!(scheduler.last_retrain, LastRetrain::Unreadable(_)));
        assert_eq!(
            scheduler.should_retrain(),
            (true, "timestamp corruption, forcing retrain".to_string())
        );
    }

    #[test]
    fn test_insufficient_data_does_not_advance() {
        let mut f = fixture(60, vec![]);

        let outcome = f.scheduler.retrain();
        assert_eq!(outcome.record.status, RetrainStatus::Failed);
        assert!(outcome.record.reason.as_deref().unwrap().contains("insufficient data"));
        assert!(outcome.model.is_none());
        assert_eq!(f.learner.calls(), 0);

        // still due immediately, and the failure is on record
        assert!(f.scheduler.should_retrain().0);
        assert_eq!(f.scheduler.last_retrain, LastRetrain::Never);
        assert_eq!(f.log.read_last().unwrap().unwrap().status, RetrainStatus::Failed);
    }

    #[test]
    fn test_successful_retrain_advances_and_persists() {
        let mut f = fixture(200, vec![]);

        let outcome = f.scheduler.retrain();
        assert!(outcome.is_success());
        assert!(outcome.model.is_some());

        let record = &outcome.record;
        assert_eq!(record.train_samples.unwrap() + record.test_samples.unwrap(), 200 - 25 - 1);
        assert_eq!(record.feature_count, Some(TechnicalFeatureEngine::FEATURES.len()));
        assert!(record.improvement.is_none());
        assert!(std::path::Path::new(record.model_reference.as_deref().unwrap()).exists());

        assert_eq!(f.scheduler.last_retrain_at(), Some(f.clock.now()));
        assert!(!f.scheduler.should_retrain().0);
        assert_eq!(f.log.len(), 1);
    }

    #[test]
    fn test_scheduled_retrain_skips_when_not_due() {
        let now = ManualClock::at("2024-06-15").now();
        let mut f = fixture(200, vec![success_record(now - chrono::Duration::days(1), 0.6)]);

        let outcome = f.scheduler.retrain();
        assert_eq!(outcome.record.status, RetrainStatus::Skipped);
        assert_eq!(f.learner.calls(), 0);
        assert_eq!(f.log.len(), 1);
        assert_eq!(f.scheduler.last_retrain_at(), Some(now - chrono::Duration::days(1)));
    }

    #[test]
    fn test_forced_retrain_ignores_schedule_and_reports_improvement() {
        let now = ManualClock::at("2024-06-15").now();
        let mut f = fixture(200, vec![success_record(now - chrono::Duration::days(1), 0.25)]);

        let outcome = f.scheduler.force_retrain(RetrainTrigger::SelfHeal);
        assert!(outcome.is_success());
        assert_eq!(outcome.record.trigger, RetrainTrigger::SelfHeal);
        assert_eq!(f.learner.calls(), 1);

        // rising bars label every row 1 and the fake model always says 1
        assert_eq!(outcome.record.test_accuracy, Some(1.0));
        let improvement = outcome.record.improvement.unwrap();
        assert!((improvement - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_performance_summary() {
        let now = ManualClock::at("2024-06-15").now();
        let f = fixture(
            0,
            vec![
                success_record(now - chrono::Duration::days(21), 0.55),
                RetrainRecord::failed(now - chrono::Duration::days(15), RetrainTrigger::Scheduled, "x"),
                success_record(now - chrono::Duration::days(14), 0.65),
                success_record(now - chrono::Duration::days(7), 0.60),
            ],
        );

        let summary = f.scheduler.performance_summary().unwrap();
        assert_eq!(summary.total_retrainings, 3);
        assert!((summary.avg_accuracy - 0.60).abs() < 1e-9);
        assert_eq!(summary.max_accuracy, 0.65);
        assert_eq!(summary.min_accuracy, 0.55);
        assert_eq!(summary.latest_accuracy, 0.60);
        assert_eq!(summary.accuracy_trend, AccuracyTrend::Improving);

        assert_eq!(f.scheduler.history(2).len(), 2);
        assert!(fixture(0, vec![]).scheduler.performance_summary().is_none());
    }
}
