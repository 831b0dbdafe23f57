//! Shared data model: instruments and the raw payloads providers hand to the
//! analysis pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentCategory {
    #[default]
    EquityFund,
    BondFund,
    OverseasFund,
}

impl InstrumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EquityFund => "equity fund",
            Self::BondFund => "bond fund",
            Self::OverseasFund => "overseas fund",
        }
    }
}

/// A fund or stock under analysis. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: InstrumentCategory,
}

impl Instrument {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            category: InstrumentCategory::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn category(mut self, category: InstrumentCategory) -> Self {
        self.category = category;
        self
    }

    /// Name for display; falls back to the code when config left it blank.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.code
        } else {
            &self.name
        }
    }
}

/// Instrument codes are short ASCII alphanumerics (`005827`, `AAPL`, `hk00700`).
pub fn is_valid_code(code: &str) -> bool {
    let len = code.len();
    (1..=12).contains(&len) && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

/// A payload tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: T,
}

/// One net-value observation, oldest first in a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub nav: f64,
    /// Daily change in percent, when the provider reports it.
    pub change_pct: Option<f64>,
}

/// Stage returns in percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePerformance {
    pub week_1: Option<f64>,
    pub month_1: Option<f64>,
    pub month_3: Option<f64>,
    pub month_6: Option<f64>,
    pub year_1: Option<f64>,
    pub year_3: Option<f64>,
}

impl StagePerformance {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Field by field: keep what `self` has, fill the gaps from `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            week_1: self.week_1.or(fallback.week_1),
            month_1: self.month_1.or(fallback.month_1),
            month_3: self.month_3.or(fallback.month_3),
            month_6: self.month_6.or(fallback.month_6),
            year_1: self.year_1.or(fallback.year_1),
            year_3: self.year_3.or(fallback.year_3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub code: String,
    pub name: String,
    /// Share of net assets in percent.
    pub ratio_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub name: String,
    pub company: Option<String>,
}

/// Intraday estimate (or last quote) for the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub last_nav: Option<f64>,
    pub estimate: Option<f64>,
    pub estimate_change_pct: Option<f64>,
    pub as_of: Option<String>,
}

/// Everything a fund-data provider may return. Providers fill what they can.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundSnapshot {
    /// Name reported by the provider, if any.
    pub name: Option<String>,
    pub nav_series: Vec<NavPoint>,
    pub performance: StagePerformance,
    pub holdings: Vec<Holding>,
    pub manager: Option<ManagerInfo>,
    pub market: Option<MarketSnapshot>,
}

impl FundSnapshot {
    /// True when no field carries usable data.
    pub fn is_empty(&self) -> bool {
        self.nav_series.is_empty()
            && self.performance.is_empty()
            && self.market.is_none()
            && self.holdings.is_empty()
    }

    pub fn latest_nav(&self) -> Option<f64> {
        self.nav_series
            .last()
            .map(|p| p.nav)
            .or_else(|| self.market.as_ref().and_then(|m| m.last_nav))
    }
}

/// Result of a fund-data chain call.
pub type ProviderResult = Sourced<FundSnapshot>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub snippet: String,
    pub url: Option<String>,
    /// Unix seconds; 0 when the source gave no usable date.
    pub published_at: i64,
}

/// Ordered news for one instrument. Empty when news enrichment failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub source: Option<String>,
    pub items: Vec<NewsItem>,
}

impl NewsDigest {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl From<Sourced<Vec<NewsItem>>> for NewsDigest {
    fn from(s: Sourced<Vec<NewsItem>>) -> Self {
        Self {
            source: Some(s.source),
            items: s.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_validation() {
        assert!(is_valid_code("005827"));
        assert!(is_valid_code("AAPL"));
        assert!(is_valid_code("0700.HK"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("005827; drop"));
        assert!(!is_valid_code("abcdefghijklmn"));
    }

    #[test]
    fn display_name_falls_back_to_code() {
        let i = Instrument::new("110011").named("  ");
        assert_eq!(i.display_name(), "110011");
        let j = Instrument::new("110011").named("E Fund Blue Chip");
        assert_eq!(j.display_name(), "E Fund Blue Chip");
    }

    #[test]
    fn snapshot_emptiness() {
        let mut s = FundSnapshot::default();
        assert!(s.is_empty());
        s.performance.week_1 = Some(1.2);
        assert!(!s.is_empty());
    }

    #[test]
    fn reported_returns_win_over_derived() {
        let reported = StagePerformance {
            week_1: Some(1.5),
            year_3: Some(40.0),
            ..Default::default()
        };
        let derived = StagePerformance {
            week_1: Some(1.1),
            month_1: Some(3.0),
            ..Default::default()
        };
        let merged = reported.or(derived);
        assert_eq!(merged.week_1, Some(1.5));
        assert_eq!(merged.month_1, Some(3.0));
        assert_eq!(merged.year_3, Some(40.0));
        assert_eq!(merged.month_6, None);
    }
}
