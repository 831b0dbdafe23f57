//! Net-value indicators fed to the analysis prompt and to the chase-high rail.
//! Pure functions over an oldest-first series.

use serde::Serialize;

use crate::model::{FundSnapshot, NavPoint, StagePerformance};

/// Percent change between the latest point and the point `n` steps earlier.
pub fn change_over(series: &[NavPoint], n: usize) -> Option<f64> {
    if n == 0 || series.len() <= n {
        return None;
    }
    let last = series[series.len() - 1].nav;
    let base = series[series.len() - 1 - n].nav;
    if base <= 0.0 {
        return None;
    }
    Some((last / base - 1.0) * 100.0)
}

/// Trailing mean over up to `window` points (fewer when the series is short).
pub fn moving_average(series: &[NavPoint], window: usize) -> Option<f64> {
    if series.is_empty() || window == 0 {
        return None;
    }
    let take = window.min(series.len());
    let sum: f64 = series[series.len() - take..].iter().map(|p| p.nav).sum();
    Some(sum / take as f64)
}

/// Stage returns derived from trading-day offsets (5 / 21 / 63 / 126 / 250).
pub fn stage_returns(series: &[NavPoint]) -> StagePerformance {
    StagePerformance {
        week_1: change_over(series, 5),
        month_1: change_over(series, 21),
        month_3: change_over(series, 63),
        month_6: change_over(series, 126),
        year_1: change_over(series, 250),
        year_3: None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrendSnapshot {
    pub latest: Option<f64>,
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    /// (latest - MA5) / MA5 in percent.
    pub deviation_ma5_pct: Option<f64>,
}

impl TrendSnapshot {
    pub fn from_series(series: &[NavPoint]) -> Self {
        let latest = series.last().map(|p| p.nav);
        let ma5 = moving_average(series, 5);
        let deviation_ma5_pct = match (latest, ma5) {
            (Some(l), Some(m)) if m > 0.0 => Some((l - m) / m * 100.0),
            _ => None,
        };
        Self {
            latest,
            ma5,
            ma10: moving_average(series, 10),
            ma20: moving_average(series, 20),
            ma60: moving_average(series, 60),
            deviation_ma5_pct,
        }
    }

    /// MA5 > MA10 > MA20.
    pub fn is_bullish_alignment(&self) -> bool {
        matches!((self.ma5, self.ma10, self.ma20), (Some(a), Some(b), Some(c)) if a > b && b > c)
    }
}

/// Short-horizon change used by the chase-high rail.
///
/// Preference: change across the last `points` NAV observations, then the
/// provider's 1-week stage return, then the intraday estimated change.
pub fn short_horizon_change(snapshot: &FundSnapshot, points: usize) -> Option<f64> {
    change_over(&snapshot.nav_series, points)
        .or(snapshot.performance.week_1)
        .or_else(|| snapshot.market.as_ref().and_then(|m| m.estimate_change_pct))
}
