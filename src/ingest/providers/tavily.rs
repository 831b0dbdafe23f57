// src/ingest/providers/tavily.rs
//! News search through the Tavily JSON search API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::news_rss::{parse_rfc2822_to_unix, search_query};
use super::{check_status, http_client};
use crate::error::ProviderFailure;
use crate::ingest::normalize_text;
use crate::ingest::types::Provider;
use crate::model::{Instrument, NewsItem};

const DEFAULT_URL: &str = "https://api.tavily.com/search";

#[derive(Serialize)]
struct SearchReq<'a> {
    api_key: &'a str,
    query: &'a str,
    topic: &'a str,
    days: u32,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    url: Option<String>,
    #[serde(default)]
    content: String,
    published_date: Option<String>,
}

pub struct TavilyProvider {
    mode: Mode,
    max_items: usize,
    days: u32,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        api_key: String,
        client: reqwest::Client,
        timeout: Duration,
    },
}

impl TavilyProvider {
    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            max_items: 5,
            days: 7,
        }
    }

    pub fn http(api_key: impl Into<String>, base_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                url: base_url.unwrap_or(DEFAULT_URL).to_string(),
                api_key: api_key.into(),
                client: http_client(timeout),
                timeout,
            },
            max_items: 5,
            days: 7,
        }
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n.max(1);
        self
    }

    /// Look-back window in days.
    pub fn with_days(mut self, days: u32) -> Self {
        self.days = days.max(1);
        self
    }

    fn parse(&self, body: &str) -> Result<Vec<NewsItem>, ProviderFailure> {
        let resp: SearchResp = serde_json::from_str(body).map_err(ProviderFailure::malformed)?;
        let items: Vec<NewsItem> = resp
            .results
            .into_iter()
            .filter_map(|h| {
                let title = normalize_text(&h.title);
                if title.is_empty() {
                    return None;
                }
                Some(NewsItem {
                    title,
                    snippet: normalize_text(&h.content),
                    url: h.url,
                    published_at: h.published_date.as_deref().map(parse_published).unwrap_or(0),
                })
            })
            .take(self.max_items)
            .collect();

        if items.is_empty() {
            return Err(ProviderFailure::Empty);
        }
        Ok(items)
    }
}

/// Tavily sends RFC 2822 for news hits and RFC 3339 elsewhere.
fn parse_published(s: &str) -> i64 {
    match DateTime::parse_from_rfc3339(s.trim()) {
        Ok(dt) => dt.timestamp(),
        Err(_) => parse_rfc2822_to_unix(s),
    }
}

#[async_trait]
impl Provider<Vec<NewsItem>> for TavilyProvider {
    async fn fetch(&self, instrument: &Instrument) -> Result<Vec<NewsItem>, ProviderFailure> {
        match &self.mode {
            Mode::Fixture(body) => self.parse(body),
            Mode::Http {
                url,
                api_key,
                client,
                timeout,
            } => {
                let query = search_query(instrument);
                let req = SearchReq {
                    api_key,
                    query: &query,
                    topic: "news",
                    days: self.days,
                    max_results: self.max_items,
                };
                let resp = client
                    .post(url)
                    .json(&req)
                    .send()
                    .await
                    .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
                check_status(resp.status())?;
                let body = resp
                    .text()
                    .await
                    .map_err(|e| ProviderFailure::from_reqwest(e, timeout.as_secs()))?;
                self.parse(&body)
            }
        }
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_hits_with_both_date_formats() {
        let body = r#"{"query":"x","results":[
            {"title":"Fund raises equity weight","url":"https://n.test/1","content":"<p>Top ten holdings</p>","published_date":"Mon, 22 Jan 2024 08:00:00 +0000"},
            {"title":"Sector rotation","url":"https://n.test/2","content":"Consumer names lag","published_date":"2024-01-22T08:00:00Z"},
            {"title":"","content":"dropped"}
        ]}"#;
        let items = TavilyProvider::from_fixture(body)
            .fetch(&Instrument::new("005827"))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].snippet, "Top ten holdings");
        assert_eq!(items[0].published_at, items[1].published_at);
    }

    #[tokio::test]
    async fn no_results_is_empty() {
        let err = TavilyProvider::from_fixture(r#"{"results":[]}"#)
            .fetch(&Instrument::new("005827"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderFailure::Empty);
    }
}
