// tests/common/mod.rs
// Shared stubs for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use fund_pulse::analyze::{BackendSelector, MockBackend};
use fund_pulse::error::ProviderFailure;
use fund_pulse::guard::GuardConfig;
use fund_pulse::ingest::types::{DataKind, Provider};
use fund_pulse::ingest::ProviderChain;
use fund_pulse::model::{FundSnapshot, Instrument, NavPoint, NewsItem};
use fund_pulse::pacer::Pacer;
use fund_pulse::pipeline::Pipeline;

/// Scripted provider that counts its calls.
pub struct StubProvider<T> {
    name: String,
    result: Result<T, ProviderFailure>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl<T: Clone + Send + Sync> StubProvider<T> {
    pub fn ok(name: &str, value: T) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: Ok(value),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str, failure: ProviderFailure) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: Err(failure),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(name: &str, value: T, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: Ok(value),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Provider<T> for StubProvider<T> {
    async fn fetch(&self, _instrument: &Instrument) -> Result<T, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.result.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Oldest-first daily series.
pub fn series(navs: &[f64]) -> Vec<NavPoint> {
    let d0 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    navs.iter()
        .enumerate()
        .map(|(i, nav)| NavPoint {
            date: d0 + chrono::Days::new(i as u64),
            nav: *nav,
            change_pct: None,
        })
        .collect()
}

/// Snapshot whose last five points moved by `change_pct`.
pub fn snapshot_with_change(change_pct: f64) -> FundSnapshot {
    let last = 1.0 * (1.0 + change_pct / 100.0);
    FundSnapshot {
        name: Some("Stub Fund".into()),
        nav_series: series(&[1.0, 1.0, 1.0, 1.0, 1.0, last]),
        ..FundSnapshot::default()
    }
}

pub fn news_item(title: &str) -> NewsItem {
    NewsItem {
        title: title.into(),
        snippet: String::new(),
        url: None,
        published_at: 0,
    }
}

/// Pipeline over stub chains, a mock backend answering `action`, no pacing.
pub fn pipeline(
    data: Vec<Arc<dyn Provider<FundSnapshot>>>,
    news: Vec<Arc<dyn Provider<Vec<NewsItem>>>>,
    action: &str,
) -> Pipeline {
    pipeline_with(data, news, action, Pacer::disabled())
}

pub fn pipeline_with(
    data: Vec<Arc<dyn Provider<FundSnapshot>>>,
    news: Vec<Arc<dyn Provider<Vec<NewsItem>>>>,
    action: &str,
    pacer: Pacer,
) -> Pipeline {
    let timeout = Duration::from_secs(5);
    Pipeline::new(
        ProviderChain::new(DataKind::FundData, data, timeout),
        ProviderChain::new(DataKind::NewsSearch, news, timeout),
        BackendSelector::new(vec![Arc::new(MockBackend::answering("mock", action))], timeout),
        Arc::new(pacer),
        GuardConfig::default(),
    )
}
