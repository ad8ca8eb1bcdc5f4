use std::path::PathBuf;
use thiserror::Error;

/// Market data could not be obtained for this cycle
#[derive(Debug, Error)]
pub enum DataFetchError {
    #[error("market data request failed: {0}")]
    Request(String),
    #[error("market data response for {symbol} was empty")]
    Empty { symbol: String },
    #[error("malformed market data row: {0}")]
    Malformed(String),
}

/// The dataset window could not be read or written
#[derive(Debug, Error)]
pub enum DataPersistError {
    #[error("failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write dataset {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode dataset row: {0}")]
    Encode(#[from] csv::Error),
}

#[derive(Debug, Error)]
#[error("insufficient data: {usable} usable rows, need at least {required}")]
pub struct InsufficientDataError {
    pub usable: usize,
    pub required: usize,
}

/// Recent-sample validation could not produce an accuracy figure
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no validation samples available")]
    NoSamples,
    #[error("no trained model loaded")]
    NoModel,
    #[error("malformed validation sample: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event log io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("event log {path} line {line} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Top-level error for the bot's own failure kinds
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    DataFetch(#[from] DataFetchError),
    #[error(transparent)]
    DataPersist(#[from] DataPersistError),
    #[error(transparent)]
    InsufficientData(#[from] InsufficientDataError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
    #[error("invalid configuration: {}", .0.join(", "))]
    Config(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = InsufficientDataError { usable: 42, required: 100 };
        assert_eq!(err.to_string(), "insufficient data: 42 usable rows, need at least 100");
    }

    #[test]
    fn test_config_error_joins_messages() {
        let err = BotError::Config(vec!["a must be > 0".to_string(), "b too big".to_string()]);
        assert_eq!(err.to_string(), "invalid configuration: a must be > 0, b too big");
    }
}
