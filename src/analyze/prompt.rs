//! Prompt assembly for analysis backends.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use super::indicators::TrendSnapshot;
use crate::model::{Instrument, NewsDigest, ProviderResult};

/// System + user message pair sent to every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub const SYSTEM_PROMPT: &str = "You are a disciplined fund analyst. Favour steady trends, \
buy pullbacks near moving averages, never chase short-term spikes, and always set a stop level. \
Reply with ONE JSON object and nothing else, shaped as: \
{\"action\":\"buy|hold|sell\",\"headline\":\"one-sentence conclusion\",\
\"checklist\":[{\"condition\":\"...\",\"status\":\"pass|warn|fail\"}],\
\"levels\":{\"entry\":number|null,\"stop\":number|null,\"target\":number|null},\
\"narrative\":\"short reasoning\"}. \
Include a checklist entry named \"chase-high\" describing short-term overextension.";

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    match v {
        Some(x) => format!("{x:.digits$}"),
        None => "n/a".to_string(),
    }
}

fn fmt_pct(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:+.2}%"),
        None => "n/a".to_string(),
    }
}

fn fmt_ts(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .filter(|_| unix > 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string())
}

/// Build the prompt from everything the pipeline gathered.
pub fn build(
    instrument: &Instrument,
    data: &ProviderResult,
    news: &NewsDigest,
    short_change_pct: Option<f64>,
) -> Prompt {
    let snap = &data.payload;
    let trend = TrendSnapshot::from_series(&snap.nav_series);
    let mut u = String::with_capacity(2_048);

    let name = snap.name.as_deref().unwrap_or(instrument.display_name());
    let _ = writeln!(u, "Instrument: {} ({}), {}", name, instrument.code, instrument.category.as_str());
    let _ = writeln!(u, "Data source: {} at {}", data.source, data.fetched_at.to_rfc3339());

    let _ = writeln!(u, "\n## Net value trend");
    let _ = writeln!(u, "Latest NAV: {}", fmt_opt(snap.latest_nav(), 4));
    let _ = writeln!(
        u,
        "MA5: {} | MA10: {} | MA20: {} | MA60: {}",
        fmt_opt(trend.ma5, 4),
        fmt_opt(trend.ma10, 4),
        fmt_opt(trend.ma20, 4),
        fmt_opt(trend.ma60, 4)
    );
    let _ = writeln!(u, "Deviation from MA5: {}", fmt_pct(trend.deviation_ma5_pct));
    let _ = writeln!(u, "Bullish MA alignment: {}", trend.is_bullish_alignment());
    let _ = writeln!(u, "Short-horizon change: {}", fmt_pct(short_change_pct));

    let p = &snap.performance;
    let _ = writeln!(u, "\n## Stage returns");
    let _ = writeln!(
        u,
        "1w {} | 1m {} | 3m {} | 6m {} | 1y {} | 3y {}",
        fmt_pct(p.week_1),
        fmt_pct(p.month_1),
        fmt_pct(p.month_3),
        fmt_pct(p.month_6),
        fmt_pct(p.year_1),
        fmt_pct(p.year_3)
    );

    if let Some(m) = &snap.market {
        let _ = writeln!(
            u,
            "Intraday estimate: {} ({}) as of {}",
            fmt_opt(m.estimate, 4),
            fmt_pct(m.estimate_change_pct),
            m.as_of.as_deref().unwrap_or("n/a")
        );
    }

    if !snap.holdings.is_empty() {
        let _ = writeln!(u, "\n## Top holdings");
        for h in snap.holdings.iter().take(10) {
            let _ = writeln!(u, "- {} {} {:.2}%", h.code, h.name, h.ratio_pct);
        }
    }
    if let Some(mgr) = &snap.manager {
        let _ = writeln!(
            u,
            "Manager: {}{}",
            mgr.name,
            mgr.company.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
        );
    }

    let _ = writeln!(u, "\n## News");
    if news.is_empty() {
        let _ = writeln!(u, "No recent news available.");
    } else {
        for item in &news.items {
            let _ = writeln!(u, "- [{}] {}: {}", fmt_ts(item.published_at), item.title, item.snippet);
        }
    }

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: u,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FundSnapshot, Holding, ManagerInfo, NewsItem, Sourced};

    #[test]
    fn prompt_mentions_news_or_its_absence() {
        let inst = Instrument::new("005827").named("Blue Chip");
        let data = Sourced {
            source: "fundgz".into(),
            fetched_at: Utc::now(),
            payload: FundSnapshot::default(),
        };
        let p = build(&inst, &data, &NewsDigest::empty(), None);
        assert!(p.user.contains("Blue Chip (005827)"));
        assert!(p.user.contains("No recent news"));
        assert!(p.system.contains("chase-high"));

        let news = NewsDigest {
            source: Some("rss".into()),
            items: vec![NewsItem {
                title: "Quarterly report".into(),
                snippet: "rotation".into(),
                url: None,
                published_at: 1_705_910_400,
            }],
        };
        let p = build(&inst, &data, &news, Some(12.5));
        assert!(p.user.contains("[2024-01-22] Quarterly report"));
        assert!(p.user.contains("+12.50%"));
    }

    #[test]
    fn profile_sections_follow_the_snapshot() {
        let inst = Instrument::new("005827");
        let mut payload = FundSnapshot {
            name: Some("E Fund Blue Chip".into()),
            ..FundSnapshot::default()
        };
        payload.performance.year_3 = Some(-20.45);
        payload.holdings = vec![Holding {
            code: "600519".into(),
            name: "Kweichow Moutai".into(),
            ratio_pct: 9.87,
        }];
        payload.manager = Some(ManagerInfo {
            name: "Zhang Kun".into(),
            company: Some("E Fund".into()),
        });
        let data = Sourced {
            source: "eastmoney".into(),
            fetched_at: Utc::now(),
            payload,
        };
        let p = build(&inst, &data, &NewsDigest::empty(), None);
        assert!(p.user.contains("E Fund Blue Chip (005827)"));
        assert!(p.user.contains("3y -20.45%"));
        assert!(p.user.contains("- 600519 Kweichow Moutai 9.87%"));
        assert!(p.user.contains("Manager: Zhang Kun (E Fund)"));
    }
}
