// src/ingest/providers/fundgz.rs
//! Intraday estimate from the fundgz JSONP feed (`jsonpgz({...});`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{check_status, http_client, parse_num};
use crate::error::ProviderFailure;
use crate::ingest::types::Provider;
use crate::model::{FundSnapshot, Instrument, MarketSnapshot, NavPoint};

const DEFAULT_URL: &str = "http://fundgz.1234567.com.cn/js";

#[derive(Debug, Deserialize)]
struct Estimate {
    #[serde(default)]
    name: String,
    /// Date of the last published net value.
    #[serde(default)]
    jzrq: String,
    /// Last published net value.
    #[serde(default)]
    dwjz: String,
    /// Estimated net value.
    #[serde(default)]
    gsz: String,
    /// Estimated change in percent.
    #[serde(default)]
    gszzl: String,
    #[serde(default)]
    gztime: String,
}

pub struct FundgzProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        base: String,
        client: reqwest::Client,
        timeout: Duration,
    },
}

impl FundgzProvider {
    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn http(base_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                base: base_url.unwrap_or(DEFAULT_URL).trim_end_matches('/').to_string(),
                client: http_client(timeout),
                timeout,
            },
        }
    }

    fn parse(body: &str) -> Result<FundSnapshot, ProviderFailure> {
        let inner = unwrap_jsonp(body).ok_or_else(|| ProviderFailure::malformed("not a jsonpgz payload"))?;
        if inner.trim().is_empty() {
            // `jsonpgz();` is what the feed returns for unknown codes.
            return Err(ProviderFailure::Empty);
        }
        let est: Estimate = serde_json::from_str(inner).map_err(ProviderFailure::malformed)?;

        let last_nav = parse_num(&est.dwjz);
        let nav_series = match (NaiveDate::parse_from_str(est.jzrq.trim(), "%Y-%m-%d"), last_nav) {
            (Ok(date), Some(nav)) => vec![NavPoint {
                date,
                nav,
                change_pct: None,
            }],
            _ => Vec::new(),
        };

        let market = MarketSnapshot {
            last_nav,
            estimate: parse_num(&est.gsz),
            estimate_change_pct: parse_num(&est.gszzl),
            as_of: Some(est.gztime).filter(|s| !s.trim().is_empty()),
        };
        if market.last_nav.is_none() && market.estimate.is_none() {
            return Err(ProviderFailure::Empty);
        }

        Ok(FundSnapshot {
            name: Some(est.name).filter(|s| !s.trim().is_empty()),
            nav_series,
            market: Some(market),
            ..FundSnapshot::default()
        })
    }
}

fn unwrap_jsonp(body: &str) -> Option<&str> {
    let t = body.trim();
    let start = t.find('(')?;
    let end = t.rfind(')')?;
    if end < start {
        return None;
    }
    Some(&t[start + 1..end])
}

#[async_trait]
impl Provider<FundSnapshot> for FundgzProvider {
    async fn fetch(&self, instrument: &Instrument) -> Result<FundSnapshot, ProviderFailure> {
        match &self.mode {
            Mode::Fixture(body) => Self::parse(body),
            Mode::Http {
                base,
                client,
                timeout,
            } => {
                let url = format!("{base}/{}.js", instrument.code);
                let resp = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
                check_status(resp.status())?;
                let body = resp
                    .text()
                    .await
                    .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
                Self::parse(&body)
            }
        }
    }

    fn name(&self) -> &str {
        "fundgz"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_estimate() {
        let body = r#"jsonpgz({"fundcode":"005827","name":"E Fund Blue Chip","jzrq":"2024-01-19","dwjz":"2.0412","gsz":"2.0550","gszzl":"0.68","gztime":"2024-01-22 15:00"});"#;
        let snap = FundgzProvider::from_fixture(body)
            .fetch(&Instrument::new("005827"))
            .await
            .unwrap();
        assert_eq!(snap.name.as_deref(), Some("E Fund Blue Chip"));
        assert_eq!(snap.nav_series.len(), 1);
        let m = snap.market.unwrap();
        assert_eq!(m.estimate, Some(2.055));
        assert_eq!(m.estimate_change_pct, Some(0.68));
    }

    #[tokio::test]
    async fn empty_callback_means_unknown_code() {
        let err = FundgzProvider::from_fixture("jsonpgz();")
            .fetch(&Instrument::new("999999"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderFailure::Empty);
    }

    #[tokio::test]
    async fn non_jsonp_is_malformed() {
        let err = FundgzProvider::from_fixture("Service Unavailable")
            .fetch(&Instrument::new("005827"))
            .await
            .unwrap_err();
        assert_eq!(err.label(), "malformed");
    }
}
