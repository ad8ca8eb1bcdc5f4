use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use super::{IngestReport, MarketDataSource, RollingWindowStore};
use crate::clock::Clock;
use crate::error::BotError;
use crate::events::{DataUpdateEvent, DataUpdateKind, EventStore};
use crate::types::DateRange;

/// Pulls the latest bars from the market data source into the rolling window
/// and records each attempt in the data-update log.
pub struct DataUpdater {
    source: Arc<dyn MarketDataSource>,
    store: Arc<RollingWindowStore>,
    log: Arc<dyn EventStore<DataUpdateEvent>>,
    clock: Arc<dyn Clock>,
    symbol: String,
    lookback_days: i64,
}

impl DataUpdater {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<RollingWindowStore>,
        log: Arc<dyn EventStore<DataUpdateEvent>>,
        clock: Arc<dyn Clock>,
        symbol: impl Into<String>,
        lookback_days: u32,
    ) -> Self {
        Self {
            source,
            store,
            log,
            clock,
            symbol: symbol.into(),
            lookback_days: i64::from(lookback_days.max(1)),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Fetch and ingest. Errors leave the stored window untouched and are
    /// recorded as `update_error` events.
    pub async fn update(&self) -> Result<IngestReport, BotError> {
        let today = self.clock.today();
        let range = DateRange::new(today - Duration::days(self.lookback_days - 1), today);

        match self.fetch_and_ingest(range).await {
            Ok(report) => {
                let date_range = report
                    .date_range()
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                self.record(DataUpdateKind::DailyUpdate {
                    rows_added: report.rows_received,
                    rows_removed: report.rows_removed,
                    total_rows: report.window.len(),
                    date_range,
                });
                info!(
                    "Daily update completed: {} rows received, {} rows in window",
                    report.rows_received,
                    report.window.len()
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Daily update failed: {}", e);
                self.record(DataUpdateKind::UpdateError { error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn fetch_and_ingest(&self, range: DateRange) -> Result<IngestReport, BotError> {
        let rows = self.source.fetch(&self.symbol, range).await?;
        Ok(self.store.ingest(rows)?)
    }

    fn record(&self, event: DataUpdateKind) {
        let event = DataUpdateEvent {
            timestamp: self.clock.now(),
            event,
        };
        if let Err(e) = self.log.append(&event) {
            error!("Error logging data update event: {}", e);
        }
    }

    /// Time of the most recent successful update in the log. Failed
    /// attempts are not updates.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        let events = self.log.read_all().unwrap_or_else(|e| {
            error!("Error reading data update log: {}", e);
            Vec::new()
        });
        events
            .iter()
            .rev()
            .find(|e| matches!(e.event, DataUpdateKind::DailyUpdate { .. }))
            .map(|e| e.timestamp)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<DataUpdateEvent> {
        self.log.tail(limit).unwrap_or_else(|e| {
            error!("Error reading data update log: {}", e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::source::MockMarketDataSource;
    use crate::data::store::tests::{bar, day};
    use crate::error::DataFetchError;
    use crate::events::MemoryEventStore;
    use rust_decimal_macros::dec;

    fn updater(source: MockMarketDataSource, dir: &tempfile::TempDir) -> (DataUpdater, Arc<MemoryEventStore<DataUpdateEvent>>) {
        let (updater, log, _) = updater_with_clock(source, dir);
        (updater, log)
    }

    fn updater_with_clock(
        source: MockMarketDataSource,
        dir: &tempfile::TempDir,
    ) -> (DataUpdater, Arc<MemoryEventStore<DataUpdateEvent>>, Arc<ManualClock>) {
        let store = Arc::new(RollingWindowStore::new(dir.path().join("prices.csv"), 494));
        let log: Arc<MemoryEventStore<DataUpdateEvent>> = Arc::new(MemoryEventStore::new());
        let clock = Arc::new(ManualClock::at("2024-01-10"));
        let updater = DataUpdater::new(Arc::new(source), store, log.clone(), clock.clone(), "BTCUSDT", 5);
        (updater, log, clock)
    }

    #[tokio::test]
    async fn test_successful_update_is_logged() {
        let mut source = MockMarketDataSource::new();
        source
            .expect_fetch()
            .withf(|symbol, range| symbol == "BTCUSDT" && range.start == day(5) && range.end == day(9))
            .times(1)
            .returning(|_, _| Ok(vec![bar(8, dec!(100)), bar(9, dec!(101))]));

        let dir = tempfile::tempdir().unwrap();
        let (updater, log) = updater(source, &dir);

        let report = updater.update().await.unwrap();
        assert_eq!(report.window.len(), 2);

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].event,
            DataUpdateKind::DailyUpdate { rows_added: 2, total_rows: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_logged_and_returned() {
        let mut source = MockMarketDataSource::new();
        source
            .expect_fetch()
            .returning(|symbol, _| Err(DataFetchError::Empty { symbol: symbol.to_string() }));

        let dir = tempfile::tempdir().unwrap();
        let (updater, log) = updater(source, &dir);

        assert!(matches!(updater.update().await, Err(BotError::DataFetch(_))));
        assert!(matches!(log.read_last().unwrap().unwrap().event, DataUpdateKind::UpdateError { .. }));
        assert_eq!(updater.recent_events(10).len(), 1);
    }

    #[tokio::test]
    async fn test_last_update_ignores_failed_attempts() {
        let mut source = MockMarketDataSource::new();
        let mut calls = 0;
        source.expect_fetch().times(2).returning(move |symbol, _| {
            calls += 1;
            if calls == 1 {
                Ok(vec![bar(9, dec!(101))])
            } else {
                Err(DataFetchError::Empty { symbol: symbol.to_string() })
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let (updater, log, clock) = updater_with_clock(source, &dir);
        assert!(updater.last_update().is_none());

        updater.update().await.unwrap();
        let succeeded_at = clock.now();
        assert_eq!(updater.last_update(), Some(succeeded_at));

        clock.advance(Duration::days(1));
        assert!(updater.update().await.is_err());

        assert_eq!(log.len(), 2);
        assert_eq!(updater.last_update(), Some(succeeded_at));
    }
}
