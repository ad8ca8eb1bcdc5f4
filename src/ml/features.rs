use anyhow::Result;
use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::types::PricePoint;

/// Engineered features for each input bar. Values are `None` where a
/// lookback window has not filled yet.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub close: f64,
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|v| matches!(v, Some(x) if x.is_finite()))
    }

    pub fn dense(&self) -> Option<Vec<f64>> {
        self.values.iter().map(|v| v.filter(|x| x.is_finite())).collect()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub names: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureFrame {
    pub fn feature_count(&self) -> usize {
        self.names.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Drop rows with missing or non-finite values
    pub fn drop_incomplete(mut self) -> Self {
        self.rows.retain(|r| r.is_complete());
        self
    }

    /// Label each row with whether the following row closed higher (1) or
    /// not (0). The final row has no successor and is left out.
    pub fn labeled(&self) -> LabeledSet {
        let usable: Vec<(Vec<f64>, f64)> = self
            .rows
            .windows(2)
            .filter_map(|pair| {
                let values = pair[0].dense()?;
                let label = if pair[1].close > pair[0].close { 1.0 } else { 0.0 };
                Some((values, label))
            })
            .collect();

        let n_features = self.feature_count();
        let mut x = Array2::<f64>::zeros((usable.len(), n_features));
        let mut y = Array1::<f64>::zeros(usable.len());
        for (i, (values, label)) in usable.iter().enumerate() {
            for (j, v) in values.iter().enumerate().take(n_features) {
                x[[i, j]] = *v;
            }
            y[i] = *label;
        }
        LabeledSet { x, y }
    }

    pub fn last_complete(&self) -> Option<&FeatureRow> {
        self.rows.iter().rev().find(|r| r.is_complete())
    }
}

#[derive(Debug, Clone)]
pub struct LabeledSet {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl LabeledSet {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

pub trait FeatureEngine: Send + Sync {
    fn generate(&self, rows: &[PricePoint]) -> Result<FeatureFrame>;
}

/// Lookback indicators over daily bars
#[derive(Debug, Clone, Default)]
pub struct TechnicalFeatureEngine;

impl TechnicalFeatureEngine {
    pub const FEATURES: [&'static str; 10] = [
        "daily_return",
        "log_return",
        "momentum_10",
        "sma_10_ratio",
        "sma_20_ratio",
        "ema_crossover",
        "rsi_14",
        "volatility_5",
        "volume_ratio",
        "close_position",
    ];

    /// Longest lookback (EMA 26 seed)
    pub const WARMUP: usize = 25;
}

impl FeatureEngine for TechnicalFeatureEngine {
    fn generate(&self, rows: &[PricePoint]) -> Result<FeatureFrame> {
        if rows.len() <= Self::WARMUP {
            debug!("{} bars is within the {}-bar warm-up; no row will be complete", rows.len(), Self::WARMUP);
        }
        let closes: Vec<f64> = rows.iter().map(|r| r.close_f64()).collect();
        let volumes: Vec<f64> = rows.iter().map(|r| r.volume.try_into().unwrap_or(0.0)).collect();
        let returns: Vec<Option<f64>> = (0..closes.len())
            .map(|i| if i == 0 { None } else { pct_change(closes[i - 1], closes[i]) })
            .collect();
        let ema_12 = ema_series(&closes, 12);
        let ema_26 = ema_series(&closes, 26);

        let feature_rows = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let close = closes[i];
                let log_return = if i > 0 && closes[i - 1] > 0.0 && close > 0.0 {
                    Some((close / closes[i - 1]).ln())
                } else {
                    None
                };
                let momentum_10 = if i >= 10 { pct_change(closes[i - 10], close) } else { None };
                let ema_crossover = match (ema_12[i], ema_26[i]) {
                    (Some(fast), Some(slow)) => Some(if fast > slow { 1.0 } else { 0.0 }),
                    _ => None,
                };

                FeatureRow {
                    date: row.date,
                    close,
                    values: vec![
                        returns[i],
                        log_return,
                        momentum_10,
                        sma(&closes, i, 10).and_then(|s| pct_change(s, close)),
                        sma(&closes, i, 20).and_then(|s| pct_change(s, close)),
                        ema_crossover,
                        rsi(&closes, i, 14),
                        volatility(&returns, i, 5),
                        sma(&volumes, i, 20).and_then(|avg| if avg > 0.0 { Some(volumes[i] / avg) } else { None }),
                        close_position(row),
                    ],
                }
            })
            .collect();

        Ok(FeatureFrame {
            names: Self::FEATURES.iter().map(|s| s.to_string()).collect(),
            rows: feature_rows,
        })
    }
}

fn pct_change(from: f64, to: f64) -> Option<f64> {
    if from == 0.0 { None } else { Some(to / from - 1.0) }
}

/// Mean of the `period` values ending at `i`
fn sma(values: &[f64], i: usize, period: usize) -> Option<f64> {
    if i + 1 < period {
        return None;
    }
    Some(values[i + 1 - period..=i].iter().sum::<f64>() / period as f64)
}

/// EMA seeded with the SMA of the first `period` values
fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = vec![None; values.len()];
    let mut prev: Option<f64> = None;
    for i in 0..values.len() {
        prev = match prev {
            Some(p) => Some(values[i] * k + p * (1.0 - k)),
            None => sma(values, i, period),
        };
        out[i] = prev;
    }
    out
}

fn rsi(closes: &[f64], i: usize, period: usize) -> Option<f64> {
    if i < period {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for j in i + 1 - period..=i {
        let change = closes[j] - closes[j - 1];
        if change > 0.0 { gains += change; } else { losses += -change; }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Sample standard deviation of the last `period` returns
fn volatility(returns: &[Option<f64>], i: usize, period: usize) -> Option<f64> {
    if i < period {
        return None;
    }
    let window: Vec<f64> = returns[i + 1 - period..=i].iter().copied().collect::<Option<_>>()?;
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (period as f64 - 1.0);
    Some(variance.sqrt())
}

/// Where the close sits inside the bar's range (0 = low, 1 = high)
fn close_position(row: &PricePoint) -> Option<f64> {
    let high: f64 = row.high.try_into().ok()?;
    let low: f64 = row.low.try_into().ok()?;
    let range = high - low;
    if range == 0.0 {
        return Some(0.5);
    }
    Some(((row.close_f64() - low) / range).clamp(0.0, 1.0))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::store::tests::bar;
    use rust_decimal::Decimal;

    /// Bars whose close moves by `step` each day from `start`
    pub(crate) fn trending_bars(n: usize, start: i64, step: i64) -> Vec<PricePoint> {
        (0..n as i64)
            .map(|i| bar(i, Decimal::from(start + step * i)))
            .collect()
    }

    #[test]
    fn test_warmup_rows_are_incomplete() {
        let bars = trending_bars(60, 1000, 1);
        let frame = TechnicalFeatureEngine.generate(&bars).unwrap();

        assert_eq!(frame.len(), 60);
        assert_eq!(frame.feature_count(), TechnicalFeatureEngine::FEATURES.len());
        assert!(!frame.rows[TechnicalFeatureEngine::WARMUP - 1].is_complete());
        assert!(frame.rows[TechnicalFeatureEngine::WARMUP].is_complete());

        let complete = frame.drop_incomplete();
        assert_eq!(complete.len(), 60 - TechnicalFeatureEngine::WARMUP);
    }

    #[test]
    fn test_labels_follow_next_close() {
        let rising = TechnicalFeatureEngine.generate(&trending_bars(40, 500, 2)).unwrap().drop_incomplete();
        let set = rising.labeled();
        assert_eq!(set.len(), rising.len() - 1);
        assert!(set.y.iter().all(|&y| y == 1.0));

        let falling = TechnicalFeatureEngine.generate(&trending_bars(40, 500, -2)).unwrap().drop_incomplete();
        assert!(falling.labeled().y.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_rsi_extremes() {
        let up: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(rsi(&up, 19, 14), Some(100.0));
        let down: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&down, 19, 14), Some(0.0));
        assert_eq!(rsi(&down, 10, 14), None);
    }

    #[test]
    fn test_sma_and_ema_seed() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 2, 3), Some(2.0));
        assert_eq!(sma(&values, 1, 3), None);

        let ema = ema_series(&values, 3);
        assert_eq!(ema[1], None);
        assert_eq!(ema[2], Some(2.0));
        assert_eq!(ema[3], Some(3.0));
    }
}
