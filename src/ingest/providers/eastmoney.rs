// src/ingest/providers/eastmoney.rs
//! Net-value history from the Eastmoney `lsjz` endpoint, optionally enriched
//! with the fund profile (manager, top holdings, reported stage returns) from
//! the Eastmoney mobile API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::histogram;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, http_client, parse_num};
use crate::analyze::indicators::stage_returns;
use crate::error::ProviderFailure;
use crate::ingest::types::Provider;
use crate::model::{FundSnapshot, Holding, Instrument, ManagerInfo, NavPoint, StagePerformance};

const DEFAULT_URL: &str = "https://api.fund.eastmoney.com/f10/lsjz";
const REFERER: &str = "https://fundf10.eastmoney.com/";
pub const DEFAULT_PROFILE_URL: &str = "https://fundmobapi.eastmoney.com";
const INFO_PATH: &str = "/FundMApi/FundBaseTypeInformation.ashx";
const HOLDINGS_PATH: &str = "/FundMNewApi/FundMNInverstPosition";
const PERIODS_PATH: &str = "/FundMApi/FundPeriodIncrease.ashx";
const TOP_HOLDINGS: usize = 10;

#[derive(Debug, Deserialize)]
struct LsjzResponse {
    #[serde(rename = "Data")]
    data: Option<LsjzData>,
    #[serde(rename = "ErrCode", default)]
    err_code: i64,
    #[serde(rename = "ErrMsg", default)]
    err_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LsjzData {
    #[serde(rename = "LSJZList", default)]
    list: Vec<LsjzRow>,
}

#[derive(Debug, Deserialize)]
struct LsjzRow {
    /// Valuation date, `YYYY-MM-DD`.
    #[serde(rename = "FSRQ")]
    date: String,
    /// Unit net value.
    #[serde(rename = "DWJZ", default)]
    nav: String,
    /// Daily change in percent.
    #[serde(rename = "JZZZL", default)]
    change: String,
}

/// Mobile API envelope: `{"Datas": ..., "ErrCode": 0, "ErrMsg": null}`.
#[derive(Debug, Deserialize)]
struct MobileResponse<T> {
    #[serde(rename = "Datas")]
    datas: Option<T>,
    #[serde(rename = "ErrCode", default)]
    err_code: i64,
    #[serde(rename = "ErrMsg", default)]
    err_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BaseInfo {
    #[serde(rename = "SHORTNAME", default)]
    short_name: Option<String>,
    /// Fund company.
    #[serde(rename = "JJGS", default)]
    company: Option<String>,
    /// Manager name(s).
    #[serde(rename = "JJJL", default)]
    manager: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Positions {
    #[serde(rename = "fundStocks", default)]
    stocks: Vec<StockRow>,
}

#[derive(Debug, Deserialize)]
struct StockRow {
    #[serde(rename = "GPDM", default)]
    code: String,
    #[serde(rename = "GPJC", default)]
    name: String,
    /// Share of net assets in percent.
    #[serde(rename = "JZBL", default)]
    ratio: String,
}

#[derive(Debug, Deserialize)]
struct PeriodRow {
    /// `Z` week, `Y` month, `3Y`, `6Y`, `1N` year, `3N`.
    title: String,
    #[serde(default)]
    syl: String,
}

/// Canned profile bodies for fixture mode. Missing parts are skipped.
#[derive(Debug, Clone, Default)]
pub struct ProfileBodies {
    pub info: Option<String>,
    pub holdings: Option<String>,
    pub periods: Option<String>,
}

pub struct EastmoneyProvider {
    mode: Mode,
    points: usize,
}

enum Mode {
    /// Owned copies of canned response bodies.
    Fixture { nav: String, profile: ProfileBodies },
    Http {
        url: String,
        /// `None` skips the profile enrichment.
        profile_url: Option<String>,
        client: reqwest::Client,
        timeout: Duration,
    },
}

impl EastmoneyProvider {
    pub fn from_fixture(body: &str) -> Self {
        Self::from_fixtures(body, ProfileBodies::default())
    }

    pub fn from_fixtures(nav: &str, profile: ProfileBodies) -> Self {
        Self {
            mode: Mode::Fixture {
                nav: nav.to_string(),
                profile,
            },
            points: 120,
        }
    }

    pub fn http(base_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                url: base_url.unwrap_or(DEFAULT_URL).to_string(),
                profile_url: None,
                client: http_client(timeout),
                timeout,
            },
            points: 120,
        }
    }

    /// Enrich HTTP fetches with the fund profile. No effect in fixture mode.
    pub fn with_profile(mut self, base_url: Option<&str>) -> Self {
        if let Mode::Http { profile_url, .. } = &mut self.mode {
            *profile_url = Some(base_url.unwrap_or(DEFAULT_PROFILE_URL).trim_end_matches('/').to_string());
        }
        self
    }

    /// Number of most recent points to keep.
    pub fn with_points(mut self, points: usize) -> Self {
        self.points = points.max(1);
        self
    }

    fn parse(body: &str, points: usize) -> Result<FundSnapshot, ProviderFailure> {
        let t0 = Instant::now();
        let resp: LsjzResponse = serde_json::from_str(body).map_err(ProviderFailure::malformed)?;
        if resp.err_code != 0 {
            return Err(ProviderFailure::Http {
                message: format!(
                    "eastmoney error {}: {}",
                    resp.err_code,
                    resp.err_msg.unwrap_or_default()
                ),
            });
        }

        let rows = resp.data.map(|d| d.list).unwrap_or_default();
        let mut series: Vec<NavPoint> = rows
            .into_iter()
            .filter_map(|r| {
                let date = NaiveDate::parse_from_str(r.date.trim(), "%Y-%m-%d").ok()?;
                let nav = parse_num(&r.nav)?;
                Some(NavPoint {
                    date,
                    nav,
                    change_pct: parse_num(&r.change),
                })
            })
            .collect();

        if series.is_empty() {
            return Err(ProviderFailure::Empty);
        }
        // Endpoint lists newest first.
        series.sort_by_key(|p| p.date);
        if series.len() > points {
            series.drain(0..series.len() - points);
        }

        histogram!("provider_parse_ms", "provider" => "eastmoney")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        Ok(FundSnapshot {
            performance: stage_returns(&series),
            nav_series: series,
            ..FundSnapshot::default()
        })
    }

    /// Fill manager, holdings and reported returns. A part that fails to
    /// parse is logged and left out; the NAV series stands on its own.
    fn enrich(snap: &mut FundSnapshot, profile: &ProfileBodies, code: &str) {
        if let Some(body) = &profile.info {
            match parse_info(body) {
                Ok(info) => {
                    if snap.name.is_none() {
                        snap.name = info.short_name.filter(|n| !n.trim().is_empty());
                    }
                    snap.manager = info
                        .manager
                        .filter(|m| !m.trim().is_empty())
                        .map(|name| ManagerInfo {
                            name: name.trim().to_string(),
                            company: info.company.filter(|c| !c.trim().is_empty()),
                        });
                }
                Err(e) => debug!(target: "provider", code, part = "info", error = %e, "profile part skipped"),
            }
        }
        if let Some(body) = &profile.holdings {
            match parse_holdings(body) {
                Ok(h) => snap.holdings = h,
                Err(e) => debug!(target: "provider", code, part = "holdings", error = %e, "profile part skipped"),
            }
        }
        if let Some(body) = &profile.periods {
            match parse_periods(body) {
                Ok(reported) => {
                    let derived = std::mem::take(&mut snap.performance);
                    snap.performance = reported.or(derived);
                }
                Err(e) => debug!(target: "provider", code, part = "periods", error = %e, "profile part skipped"),
            }
        }
    }
}

fn mobile_datas<T: DeserializeOwned>(body: &str) -> Result<T, ProviderFailure> {
    let resp: MobileResponse<T> = serde_json::from_str(body).map_err(ProviderFailure::malformed)?;
    if resp.err_code != 0 {
        return Err(ProviderFailure::Http {
            message: format!(
                "eastmoney error {}: {}",
                resp.err_code,
                resp.err_msg.unwrap_or_default()
            ),
        });
    }
    resp.datas.ok_or(ProviderFailure::Empty)
}

fn parse_info(body: &str) -> Result<BaseInfo, ProviderFailure> {
    mobile_datas(body)
}

fn parse_holdings(body: &str) -> Result<Vec<Holding>, ProviderFailure> {
    let positions: Positions = mobile_datas(body)?;
    Ok(positions
        .stocks
        .into_iter()
        .filter_map(|r| {
            let ratio_pct = parse_num(&r.ratio)?;
            let name = r.name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Holding {
                code: r.code.trim().to_string(),
                name: name.to_string(),
                ratio_pct,
            })
        })
        .take(TOP_HOLDINGS)
        .collect())
}

fn parse_periods(body: &str) -> Result<StagePerformance, ProviderFailure> {
    let rows: Vec<PeriodRow> = mobile_datas(body)?;
    let mut perf = StagePerformance::default();
    for r in rows {
        let slot = match r.title.trim() {
            "Z" => &mut perf.week_1,
            "Y" => &mut perf.month_1,
            "3Y" => &mut perf.month_3,
            "6Y" => &mut perf.month_6,
            "1N" => &mut perf.year_1,
            "3N" => &mut perf.year_3,
            _ => continue,
        };
        *slot = parse_num(&r.syl);
    }
    Ok(perf)
}

async fn get_text(
    client: &reqwest::Client,
    url: String,
    query: &[(&str, &str)],
    timeout: Duration,
) -> Result<String, ProviderFailure> {
    let resp = client
        .get(url)
        .header(reqwest::header::REFERER, REFERER)
        .query(query)
        .send()
        .await
        .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
    check_status(resp.status())?;
    resp.text()
        .await
        .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))
}

fn keep_part(code: &str, part: &str, r: Result<String, ProviderFailure>) -> Option<String> {
    r.map_err(|e| debug!(target: "provider", code, part, error = %e, "profile request failed"))
        .ok()
}

#[async_trait]
impl Provider<FundSnapshot> for EastmoneyProvider {
    async fn fetch(&self, instrument: &Instrument) -> Result<FundSnapshot, ProviderFailure> {
        let code = instrument.code.as_str();
        match &self.mode {
            Mode::Fixture { nav, profile } => {
                let mut snap = Self::parse(nav, self.points)?;
                Self::enrich(&mut snap, profile, code);
                Ok(snap)
            }
            Mode::Http {
                url,
                profile_url,
                client,
                timeout,
            } => {
                let page_size = self.points.to_string();
                let body = get_text(
                    client,
                    url.clone(),
                    &[("fundCode", code), ("pageIndex", "1"), ("pageSize", page_size.as_str())],
                    *timeout,
                )
                .await?;
                let mut snap = Self::parse(&body, self.points)?;

                if let Some(base) = profile_url {
                    let query = [
                        ("FCODE", code),
                        ("deviceid", "Wap"),
                        ("plat", "Wap"),
                        ("product", "EFund"),
                        ("version", "2.0.0"),
                    ];
                    let (info, holdings, periods) = tokio::join!(
                        get_text(client, format!("{base}{INFO_PATH}"), &query, *timeout),
                        get_text(client, format!("{base}{HOLDINGS_PATH}"), &query, *timeout),
                        get_text(client, format!("{base}{PERIODS_PATH}"), &query, *timeout),
                    );
                    let profile = ProfileBodies {
                        info: keep_part(code, "info", info),
                        holdings: keep_part(code, "holdings", holdings),
                        periods: keep_part(code, "periods", periods),
                    };
                    Self::enrich(&mut snap, &profile, code);
                }
                Ok(snap)
            }
        }
    }

    fn name(&self) -> &str {
        "eastmoney"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"Data":{"LSJZList":[
        {"FSRQ":"2024-01-19","DWJZ":"2.0412","LJJZ":"2.0412","JZZZL":"-0.52"},
        {"FSRQ":"2024-01-18","DWJZ":"2.0519","LJJZ":"2.0519","JZZZL":"1.10"},
        {"FSRQ":"2024-01-17","DWJZ":"2.0296","LJJZ":"2.0296","JZZZL":""}
    ]},"ErrCode":0,"ErrMsg":null,"TotalCount":3}"#;

    #[tokio::test]
    async fn fixture_is_sorted_oldest_first() {
        let p = EastmoneyProvider::from_fixture(BODY);
        let snap = p.fetch(&Instrument::new("005827")).await.unwrap();
        assert_eq!(snap.nav_series.len(), 3);
        assert_eq!(snap.nav_series[0].nav, 2.0296);
        assert_eq!(snap.nav_series[0].change_pct, None);
        assert_eq!(snap.latest_nav(), Some(2.0412));
    }

    #[tokio::test]
    async fn truncates_to_points() {
        let p = EastmoneyProvider::from_fixture(BODY).with_points(2);
        let snap = p.fetch(&Instrument::new("005827")).await.unwrap();
        assert_eq!(snap.nav_series.len(), 2);
        assert_eq!(snap.nav_series[0].nav, 2.0519);
    }

    #[tokio::test]
    async fn empty_list_is_a_failure() {
        let p = EastmoneyProvider::from_fixture(r#"{"Data":{"LSJZList":[]},"ErrCode":0}"#);
        let err = p.fetch(&Instrument::new("000000")).await.unwrap_err();
        assert_eq!(err, ProviderFailure::Empty);
    }

    #[tokio::test]
    async fn error_code_is_reported() {
        let p = EastmoneyProvider::from_fixture(r#"{"Data":null,"ErrCode":-999,"ErrMsg":"busy"}"#);
        let err = p.fetch(&Instrument::new("005827")).await.unwrap_err();
        assert!(err.to_string().contains("busy"));
    }

    const INFO: &str = r#"{"Datas":{"FCODE":"005827","SHORTNAME":"E Fund Blue Chip","FTYPE":"hybrid","JJGS":"E Fund","JJJL":"Zhang Kun"},"ErrCode":0,"ErrMsg":null}"#;

    const PERIODS: &str = r#"{"Datas":[
        {"title":"Z","syl":"1.50"},
        {"title":"Y","syl":"-2.10"},
        {"title":"3Y","syl":"4.00"},
        {"title":"6Y","syl":"--"},
        {"title":"1N","syl":"12.30"},
        {"title":"3N","syl":"-20.45"},
        {"title":"LN","syl":"150.00"}
    ],"ErrCode":0,"ErrMsg":null}"#;

    fn holdings_body(rows: usize) -> String {
        let stocks: Vec<String> = (0..rows)
            .map(|i| format!(r#"{{"GPDM":"6000{i:02}","GPJC":"Stock {i}","JZBL":"{}.5"}}"#, 10 - i.min(9)))
            .collect();
        format!(r#"{{"Datas":{{"fundStocks":[{}]}},"ErrCode":0}}"#, stocks.join(","))
    }

    #[tokio::test]
    async fn profile_fills_manager_holdings_and_reported_returns() {
        let p = EastmoneyProvider::from_fixtures(
            BODY,
            ProfileBodies {
                info: Some(INFO.into()),
                holdings: Some(holdings_body(12)),
                periods: Some(PERIODS.into()),
            },
        );
        let snap = p.fetch(&Instrument::new("005827")).await.unwrap();

        assert_eq!(snap.name.as_deref(), Some("E Fund Blue Chip"));
        let mgr = snap.manager.unwrap();
        assert_eq!(mgr.name, "Zhang Kun");
        assert_eq!(mgr.company.as_deref(), Some("E Fund"));

        assert_eq!(snap.holdings.len(), TOP_HOLDINGS);
        assert_eq!(snap.holdings[0].code, "600000");
        assert_eq!(snap.holdings[0].ratio_pct, 10.5);

        assert_eq!(snap.performance.week_1, Some(1.5));
        assert_eq!(snap.performance.month_1, Some(-2.1));
        assert_eq!(snap.performance.year_3, Some(-20.45));
        assert_eq!(snap.nav_series.len(), 3);
    }

    #[tokio::test]
    async fn broken_profile_parts_keep_the_nav_series() {
        let p = EastmoneyProvider::from_fixtures(
            BODY,
            ProfileBodies {
                info: Some(r#"{"Datas":null,"ErrCode":-1,"ErrMsg":"busy"}"#.into()),
                holdings: Some("<html>blocked</html>".into()),
                periods: None,
            },
        );
        let snap = p.fetch(&Instrument::new("005827")).await.unwrap();
        assert!(snap.manager.is_none());
        assert!(snap.holdings.is_empty());
        assert_eq!(snap.nav_series.len(), 3);
        // Derived from the series when nothing was reported.
        assert_eq!(snap.performance, stage_returns(&snap.nav_series));
    }

    #[test]
    fn unreported_periods_stay_empty() {
        let perf = parse_periods(PERIODS).unwrap();
        assert_eq!(perf.month_6, None);
        assert_eq!(perf.year_1, Some(12.3));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let p = EastmoneyProvider::from_fixture("<html>blocked</html>");
        let err = p.fetch(&Instrument::new("005827")).await.unwrap_err();
        assert_eq!(err.label(), "malformed");
    }
}
