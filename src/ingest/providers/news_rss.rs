// src/ingest/providers/news_rss.rs
//! News search over an RSS search feed (Google News style `?q=` endpoint).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use super::{check_status, http_client};
use crate::error::ProviderFailure;
use crate::ingest::normalize_text;
use crate::ingest::types::Provider;
use crate::model::{Instrument, NewsItem};

const DEFAULT_URL: &str = "https://news.google.com/rss/search";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

pub(crate) fn parse_rfc2822_to_unix(ts: &str) -> i64 {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .unwrap_or(0)
}

pub struct RssNewsProvider {
    mode: Mode,
    max_items: usize,
    locale: Locale,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        timeout: Duration,
    },
}

/// `hl` / `gl` / `ceid` query parameters of the feed.
#[derive(Debug, Clone)]
pub struct Locale {
    pub hl: String,
    pub gl: String,
    pub ceid: String,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            hl: "zh-CN".into(),
            gl: "CN".into(),
            ceid: "CN:zh-Hans".into(),
        }
    }
}

impl RssNewsProvider {
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
            max_items: 5,
            locale: Locale::default(),
        }
    }

    pub fn http(base_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                url: base_url.unwrap_or(DEFAULT_URL).to_string(),
                client: http_client(timeout),
                timeout,
            },
            max_items: 5,
            locale: Locale::default(),
        }
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n.max(1);
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<NewsItem>, ProviderFailure> {
        let t0 = Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).map_err(ProviderFailure::malformed)?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(self.max_items));
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            out.push(NewsItem {
                title,
                snippet: normalize_text(it.description.as_deref().unwrap_or_default()),
                url: it.link,
                published_at: it
                    .pub_date
                    .as_deref()
                    .map(parse_rfc2822_to_unix)
                    .unwrap_or(0),
            });
            if out.len() >= self.max_items {
                break;
            }
        }

        histogram!("provider_parse_ms", "provider" => "rss")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        if out.is_empty() {
            return Err(ProviderFailure::Empty);
        }
        Ok(out)
    }
}

/// Search phrase for an instrument: its name, plus the code when they differ.
pub(crate) fn search_query(instrument: &Instrument) -> String {
    let name = instrument.display_name();
    if name == instrument.code {
        name.to_string()
    } else {
        format!("{name} {}", instrument.code)
    }
}

#[async_trait]
impl Provider<Vec<NewsItem>> for RssNewsProvider {
    async fn fetch(&self, instrument: &Instrument) -> Result<Vec<NewsItem>, ProviderFailure> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http {
                url,
                client,
                timeout,
            } => {
                let q = search_query(instrument);
                let resp = client
                    .get(url)
                    .query(&[
                        ("q", q.as_str()),
                        ("hl", self.locale.hl.as_str()),
                        ("gl", self.locale.gl.as_str()),
                        ("ceid", self.locale.ceid.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
                check_status(resp.status())?;
                let body = resp
                    .text()
                    .await
                    .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
