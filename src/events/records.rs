use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for RetrainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainStatus::Success => write!(f, "success"),
            RetrainStatus::Failed => write!(f, "failed"),
            RetrainStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// What asked for the retrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainTrigger {
    Scheduled,
    SelfHeal,
    Manual,
}

/// One retrain attempt. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRecord {
    pub timestamp: DateTime<Utc>,
    pub status: RetrainStatus,
    pub trigger: RetrainTrigger,
    pub train_accuracy: Option<f64>,
    pub test_accuracy: Option<f64>,
    pub train_samples: Option<usize>,
    pub test_samples: Option<usize>,
    pub feature_count: Option<usize>,
    pub model_reference: Option<String>,
    pub improvement: Option<f64>,
    pub reason: Option<String>,
}

impl RetrainRecord {
    fn bare(timestamp: DateTime<Utc>, status: RetrainStatus, trigger: RetrainTrigger, reason: String) -> Self {
        Self {
            timestamp,
            status,
            trigger,
            train_accuracy: None,
            test_accuracy: None,
            train_samples: None,
            test_samples: None,
            feature_count: None,
            model_reference: None,
            improvement: None,
            reason: Some(reason),
        }
    }

    pub fn skipped(timestamp: DateTime<Utc>, trigger: RetrainTrigger, reason: impl Into<String>) -> Self {
        Self::bare(timestamp, RetrainStatus::Skipped, trigger, reason.into())
    }

    pub fn failed(timestamp: DateTime<Utc>, trigger: RetrainTrigger, reason: impl Into<String>) -> Self {
        Self::bare(timestamp, RetrainStatus::Failed, trigger, reason.into())
    }

    pub fn is_success(&self) -> bool {
        self.status == RetrainStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum DataUpdateKind {
    DailyUpdate {
        rows_added: usize,
        rows_removed: usize,
        total_rows: usize,
        date_range: String,
    },
    UpdateError {
        error: String,
    },
}

/// Entry in the data-update log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdateEvent {
    pub timestamp: DateTime<Utc>,
    pub event: DataUpdateKind,
}
