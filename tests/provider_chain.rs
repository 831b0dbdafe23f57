// tests/provider_chain.rs
//
// Ordered fallback over providers:
// - k-th provider answers after k-1 failures; k+1.. are never called
// - all N fail -> exactly N reasons, in order
// - a slow provider counts as a timeout failure

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::StubProvider;
use fund_pulse::error::ProviderFailure;
use fund_pulse::ingest::providers::eastmoney::EastmoneyProvider;
use fund_pulse::ingest::providers::fundgz::FundgzProvider;
use fund_pulse::ingest::types::{DataKind, Provider};
use fund_pulse::ingest::ProviderChain;
use fund_pulse::model::{FundSnapshot, Instrument, NewsItem};

fn fund() -> Instrument {
    Instrument::new("005827")
}

#[tokio::test]
async fn kth_provider_answers_and_later_ones_are_untouched() {
    let p1 = StubProvider::failing("p1", ProviderFailure::RateLimited);
    let p2 = StubProvider::failing("p2", ProviderFailure::malformed("bad json"));
    let p3 = StubProvider::ok("p3", common::snapshot_with_change(1.0));
    let p4 = StubProvider::ok("p4", FundSnapshot::default());

    let providers: Vec<Arc<dyn Provider<FundSnapshot>>> =
        vec![p1.clone(), p2.clone(), p3.clone(), p4.clone()];
    let chain = ProviderChain::new(DataKind::FundData, providers, Duration::from_secs(1));

    let got = chain.fetch(&fund()).await.unwrap();
    assert_eq!(got.source, "p3");
    assert_eq!(got.payload.name.as_deref(), Some("Stub Fund"));
    assert_eq!((p1.calls(), p2.calls(), p3.calls(), p4.calls()), (1, 1, 1, 0));
}

#[tokio::test]
async fn all_failing_reports_one_reason_each() {
    let providers: Vec<Arc<dyn Provider<Vec<NewsItem>>>> = vec![
        StubProvider::failing("rss", ProviderFailure::Empty),
        StubProvider::failing("tavily", ProviderFailure::http("502 Bad Gateway")),
        StubProvider::failing("backup", ProviderFailure::RateLimited),
    ];
    let chain = ProviderChain::new(DataKind::NewsSearch, providers, Duration::from_secs(1));

    let err = chain.fetch(&fund()).await.unwrap_err();
    assert_eq!(err.kind, DataKind::NewsSearch);
    assert_eq!(err.failures.len(), 3);
    let names: Vec<_> = err.failures.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["rss", "tavily", "backup"]);
    assert_eq!(err.failures[1].failure, ProviderFailure::http("502 Bad Gateway"));
}

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out_and_falls_back() {
    let slow = StubProvider::slow("slow", FundSnapshot::default(), Duration::from_secs(30));
    let fast = StubProvider::ok("fast", common::snapshot_with_change(2.0));
    let providers: Vec<Arc<dyn Provider<FundSnapshot>>> = vec![slow.clone(), fast];
    let chain = ProviderChain::new(DataKind::FundData, providers, Duration::from_secs(2));

    let got = chain.fetch(&fund()).await.unwrap();
    assert_eq!(got.source, "fast");
    assert_eq!(slow.calls(), 1);
}

#[tokio::test]
async fn fixture_backed_providers_chain_together() {
    // eastmoney says "no data", fundgz answers with an estimate.
    let eastmoney = EastmoneyProvider::from_fixture(
        r#"{"Data":{"LSJZList":[]},"ErrCode":0,"ErrMsg":null,"TotalCount":0}"#,
    );
    let fundgz = FundgzProvider::from_fixture(
        r#"jsonpgz({"fundcode":"005827","name":"Blue Chip Mixed","jzrq":"2024-03-08","dwjz":"2.0120","gsz":"2.0345","gszzl":"1.12","gztime":"2024-03-11 15:00"});"#,
    );
    let providers: Vec<Arc<dyn Provider<FundSnapshot>>> =
        vec![Arc::new(eastmoney), Arc::new(fundgz)];
    let chain = ProviderChain::new(DataKind::FundData, providers, Duration::from_secs(1));

    let got = chain.fetch(&fund()).await.unwrap();
    assert_eq!(got.source, "fundgz");
    let market = got.payload.market.expect("estimate");
    assert_eq!(market.estimate_change_pct, Some(1.12));
    assert_eq!(got.payload.name.as_deref(), Some("Blue Chip Mixed"));
}
