use async_trait::async_trait;
use chrono::{NaiveTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::DataFetchError;
use crate::types::{DateRange, PricePoint};

/// Binance caps klines responses at 1000 rows
const MAX_KLINES: i64 = 1000;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch(&self, symbol: &str, range: DateRange) -> Result<Vec<PricePoint>, DataFetchError>;
}

/// Daily klines from the public Binance REST API
#[derive(Debug, Clone)]
pub struct BinanceDataSource {
    client: Client,
    base_url: String,
    interval: String,
}

impl BinanceDataSource {
    pub fn new(base_url: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            interval: interval.into(),
        }
    }

    fn klines_url(&self, symbol: &str, range: DateRange) -> String {
        let start = Utc.from_utc_datetime(&range.start.and_time(NaiveTime::MIN)).timestamp_millis();
        let end = Utc
            .from_utc_datetime(&range.end.and_time(NaiveTime::MIN))
            .timestamp_millis()
            + 86_400_000
            - 1;
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            symbol,
            self.interval,
            start,
            end,
            range.days().clamp(1, MAX_KLINES)
        )
    }
}

#[async_trait]
impl MarketDataSource for BinanceDataSource {
    async fn fetch(&self, symbol: &str, range: DateRange) -> Result<Vec<PricePoint>, DataFetchError> {
        info!("Fetching latest data for {} ({})...", symbol, range);
        let url = self.klines_url(symbol, range);
        debug!("GET {}", url);

        let resp: Vec<Vec<serde_json::Value>> = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DataFetchError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| DataFetchError::Request(e.to_string()))?;

        let rows = resp
            .iter()
            .map(|k| parse_kline(k))
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Err(DataFetchError::Empty { symbol: symbol.to_string() });
        }

        info!("Successfully fetched {} rows of data", rows.len());
        Ok(rows)
    }
}

/// `[open_time, open, high, low, close, volume, ...]`
fn parse_kline(k: &[serde_json::Value]) -> Result<PricePoint, DataFetchError> {
    let open_time = k
        .first()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| DataFetchError::Malformed("missing open time".to_string()))?;
    let date = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| DataFetchError::Malformed(format!("bad open time {}", open_time)))?
        .date_naive();

    let field = |idx: usize, name: &str| -> Result<Decimal, DataFetchError> {
        let raw = k
            .get(idx)
            .and_then(|v| v.as_str())
            .ok_or_else(|| DataFetchError::Malformed(format!("missing {}", name)))?;
        Decimal::from_str(raw).map_err(|e| DataFetchError::Malformed(format!("{} '{}': {}", name, raw, e)))
    };

    Ok(PricePoint {
        date,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}
