// tests/pacer_batch.rs
//
// Sequential batch runs: pacing between instruments, failures carried into
// the dashboard, immediate mode sending one message per instrument.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use fund_pulse::config::RunMode;
use fund_pulse::error::ProviderFailure;
use fund_pulse::ingest::types::Provider;
use fund_pulse::model::{FundSnapshot, Instrument};
use fund_pulse::notify::{
    Channel, ChannelHandle, DispatchPolicy, Dispatcher, Markup, ReportDetail, ReportEntry,
    Rendered,
};
use fund_pulse::pacer::{CallKind, Pacer, PacingConfig};
use fund_pulse::runner::run_instruments;

/// Answers every code except `broken`.
struct PickyProvider {
    broken: &'static str,
}

#[async_trait]
impl Provider<FundSnapshot> for PickyProvider {
    async fn fetch(&self, instrument: &Instrument) -> Result<FundSnapshot, ProviderFailure> {
        if instrument.code == self.broken {
            return Err(ProviderFailure::Empty);
        }
        Ok(common::snapshot_with_change(2.0))
    }

    fn name(&self) -> &str {
        "picky"
    }
}

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<Rendered>>,
}

#[async_trait]
impl Channel for Inbox {
    fn markup(&self) -> Markup {
        Markup::Plain
    }

    fn limit(&self) -> usize {
        10_000
    }

    async fn deliver(&self, message: &Rendered) -> Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn instruments() -> Vec<Instrument> {
    ["005827", "110022", "161725"]
        .into_iter()
        .map(Instrument::new)
        .collect()
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(
        DispatchPolicy {
            max_attempts: 1,
            backoff_ms: 1,
            timeout_secs: 5,
        },
        ReportDetail::Simple,
    )
}

#[tokio::test(start_paused = true)]
async fn instruments_are_spaced_by_the_pacer() {
    let pacer = Pacer::new(PacingConfig {
        data_fetch_ms: 1_000,
        news_search_ms: 0,
        ai_backend_ms: 0,
    });
    assert_eq!(pacer.delay(CallKind::DataFetch), Duration::from_secs(1));

    let data: Vec<Arc<dyn Provider<FundSnapshot>>> =
        vec![common::StubProvider::ok("stub", common::snapshot_with_change(1.0))];
    let pipeline = common::pipeline_with(data, vec![], "hold", pacer);

    let list = instruments();
    let t0 = Instant::now();
    let summary = run_instruments(&pipeline, &dispatcher(), &[], &list, RunMode::Dashboard).await;

    assert_eq!(summary.entries.len(), 3);
    assert!(t0.elapsed() >= Duration::from_secs(2));
    assert!(summary.reports.is_empty());
}

#[tokio::test]
async fn dashboard_lists_failures_after_decisions() {
    let data: Vec<Arc<dyn Provider<FundSnapshot>>> = vec![Arc::new(PickyProvider { broken: "110022" })];
    let pipeline = common::pipeline(data, vec![], "buy");
    let inbox = Arc::new(Inbox::default());
    let channels = vec![ChannelHandle::new("inbox", inbox.clone())];

    let summary =
        run_instruments(&pipeline, &dispatcher(), &channels, &instruments(), RunMode::Dashboard).await;

    assert_eq!(summary.failed(), 1);
    assert!(matches!(&summary.entries[1], ReportEntry::Failed { code, .. } if code == "110022"));
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].delivered(), ["inbox"]);

    let messages = inbox.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    let body = &messages[0].body;
    assert!(body.starts_with("3 instruments | buy:2 hold:0 sell:0 failed:1"));
    assert!(body.find("161725").unwrap() < body.find("110022").unwrap());
    assert!(body.contains("[FAIL] 110022 (110022) failed: data unavailable"));
}

#[tokio::test]
async fn immediate_mode_sends_each_instrument() {
    let data: Vec<Arc<dyn Provider<FundSnapshot>>> = vec![Arc::new(PickyProvider { broken: "161725" })];
    let pipeline = common::pipeline(data, vec![], "hold");
    let inbox = Arc::new(Inbox::default());
    let channels = vec![ChannelHandle::new("inbox", inbox.clone())];

    let summary =
        run_instruments(&pipeline, &dispatcher(), &channels, &instruments(), RunMode::Immediate).await;

    assert_eq!(summary.reports.len(), 3);
    let messages = inbox.messages.lock().unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].title.ends_with(": HOLD"));
    assert!(messages[2].body.contains("failed:1"));
}
