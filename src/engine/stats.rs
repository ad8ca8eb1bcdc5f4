use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::events::RetrainStatus;
use crate::types::{Side, SignalIntent};

/// Signal counts accumulated over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradingStats {
    pub total_signals: u64,
    pub buy_signals: u64,
    pub sell_signals: u64,
}

impl TradingStats {
    pub fn record(&mut self, intents: &[SignalIntent]) {
        for intent in intents {
            self.total_signals += 1;
            match intent.side {
                Side::Buy => self.buy_signals += 1,
                Side::Sell => self.sell_signals += 1,
            }
        }
    }
}

/// What the data step did this cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DataStep {
    /// Already updated today
    UpToDate,
    Updated { rows_received: usize, total_rows: usize },
    Failed(String),
}

/// Per-cycle outcome of every step, kept for logging and tests
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub data: Option<DataStep>,
    pub scheduled_retrain: Option<RetrainStatus>,
    pub recent_accuracy: Option<f64>,
    pub self_heal: Option<RetrainStatus>,
    pub signals: Vec<SignalIntent>,
    /// Set when a step failed and the rest of the cycle was abandoned
    pub error: Option<String>,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            data: None,
            scheduled_retrain: None,
            recent_accuracy: None,
            self_heal: None,
            signals: Vec::new(),
            error: None,
        }
    }

    pub fn completed(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Interrupted,
    MaxCycles,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Interrupted => write!(f, "Interrupted"),
            StopReason::MaxCycles => write!(f, "Max cycles reached"),
        }
    }
}

/// Aggregate emitted when the loop exits
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub uptime_seconds: u64,
    pub failed_cycles: u64,
    pub stats: TradingStats,
    pub last_daily_update: Option<NaiveDate>,
    pub last_retrain: Option<DateTime<Utc>>,
    pub recent_accuracy: f64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("                    FINAL SUMMARY");
        println!("{}", "=".repeat(60));
        println!("Stop Reason:        {}", self.stop_reason);
        println!("Cycles:             {} ({} failed)", self.cycles, self.failed_cycles);
        println!("Uptime:             {}s", self.uptime_seconds);
        println!("{}", "-".repeat(60));
        println!("SIGNALS");
        println!("  Total:              {}", self.stats.total_signals);
        println!("  Buy:                {}", self.stats.buy_signals);
        println!("  Sell:               {}", self.stats.sell_signals);
        println!("{}", "-".repeat(60));
        println!("MODEL");
        println!("  Recent Accuracy:    {:.2}%", self.recent_accuracy * 100.0);
        println!(
            "  Last Retrain:       {}",
            self.last_retrain.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
        );
        println!(
            "  Last Data Update:   {}",
            self.last_daily_update.map(|d| d.to_string()).unwrap_or_else(|| "never".to_string())
        );
        println!("{}", "=".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_counts() {
        let mut stats = TradingStats::default();
        stats.record(&[
            SignalIntent::new(Side::Buy, 0.7, "up"),
            SignalIntent::new(Side::Sell, 0.8, "down"),
            SignalIntent::new(Side::Buy, 0.9, "up"),
        ]);
        stats.record(&[]);

        assert_eq!(
            stats,
            TradingStats { total_signals: 3, buy_signals: 2, sell_signals: 1 }
        );
    }
}
