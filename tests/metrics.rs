// tests/metrics.rs
mod common;

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::StubProvider;
use fund_pulse::analyze::{BackendSelector, DynBackend, MockBackend, MockReply};
use fund_pulse::error::ProviderFailure;
use fund_pulse::guard::GuardConfig;
use fund_pulse::ingest::types::{DataKind, Provider};
use fund_pulse::ingest::ProviderChain;
use fund_pulse::pacer::Pacer;
use fund_pulse::pipeline::Pipeline;
use fund_pulse::model::{FundSnapshot, Instrument};
use fund_pulse::telemetry::Metrics;

#[tokio::test]
async fn metrics_endpoint_exposes_pipeline_series() {
    let metrics = Metrics::init(10.0).expect("recorder");
    // A second init reuses the installed recorder.
    assert!(Metrics::init(10.0).is_ok());

    // One corrected run (buy after +15%) touches every pipeline-side series.
    // The first provider and backend fail so their skipped attempts are
    // counted with name and reason.
    let data: Vec<Arc<dyn Provider<FundSnapshot>>> = vec![
        StubProvider::failing("down-feed", ProviderFailure::RateLimited),
        StubProvider::ok("stub", common::snapshot_with_change(15.0)),
    ];
    let backends: Vec<DynBackend> = vec![
        Arc::new(MockBackend::new("garbled", MockReply::Text("not json".into()))),
        Arc::new(MockBackend::answering("mock", "buy")),
    ];
    let timeout = std::time::Duration::from_secs(5);
    let pipeline = Pipeline::new(
        ProviderChain::new(DataKind::FundData, data, timeout),
        ProviderChain::new(DataKind::NewsSearch, vec![], timeout),
        BackendSelector::new(backends, timeout),
        Arc::new(Pacer::disabled()),
        GuardConfig::default(),
    );
    pipeline.run_logged(&Instrument::new("005827")).await.unwrap();

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "chase_high_threshold_pct",
        "provider_attempts_total",
        "backend_attempts_total",
        "pipeline_runs_total",
        "pipeline_duration_ms",
        "guard_corrections_total",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }

    let skipped_provider = text
        .lines()
        .find(|l| l.starts_with("provider_attempts_total") && l.contains(r#"provider="down-feed""#))
        .expect("skipped provider is labelled");
    assert!(skipped_provider.contains(r#"outcome="failed""#));
    assert!(skipped_provider.contains(r#"reason="rate_limited""#));

    let skipped_backend = text
        .lines()
        .find(|l| l.starts_with("backend_attempts_total") && l.contains(r#"backend="garbled""#))
        .expect("skipped backend is labelled");
    assert!(skipped_backend.contains(r#"outcome="malformed""#));
}
