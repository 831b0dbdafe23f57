// src/analyze/mod.rs
//! Analysis entry: turns gathered data into a validated `Decision` by trying
//! the configured backends in order.

pub mod ai_adapter;
pub mod indicators;
pub mod prompt;

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::decision::{parse_reply, Decision};
use crate::error::{Attempted, BackendFailure, NoBackendAvailable};
use crate::fallback;
use crate::model::{Instrument, NewsDigest, ProviderResult};

pub use ai_adapter::{AnalysisBackend, DynBackend, MockBackend, MockReply};
pub use prompt::Prompt;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "backend_attempts_total",
            "Analysis backend attempts by backend and outcome."
        );
        describe_histogram!(
            "backend_latency_ms",
            "Latency of the answering backend in milliseconds."
        );
    });
}

/// Ordered list of interchangeable analysis backends.
#[derive(Clone)]
pub struct BackendSelector {
    backends: Vec<DynBackend>,
    timeout: Duration,
}

impl BackendSelector {
    /// `backends` must already be in priority order.
    pub fn new(backends: Vec<DynBackend>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Build the prompt, then ask each backend in turn. A reply that does not
    /// parse into a valid decision is a failure of that backend, same as an
    /// unreachable one.
    pub async fn analyze(
        &self,
        instrument: &Instrument,
        data: &ProviderResult,
        news: &NewsDigest,
        short_change_pct: Option<f64>,
    ) -> Result<Decision, NoBackendAvailable> {
        ensure_metrics_described();
        let prompt = prompt::build(instrument, data, news, short_change_pct);
        let prompt = &prompt;

        let result = fallback::first_success(
            "analysis",
            &self.backends,
            self.timeout,
            |b| b.name().to_string(),
            |d| BackendFailure::Timeout { secs: d.as_secs() },
            |b| async move {
                let raw = b.complete(prompt).await?;
                parse_reply(instrument, b.name(), &raw).map_err(BackendFailure::malformed)
            },
        )
        .await;

        match result {
            Ok(answered) => {
                count_failures(&answered.skipped);
                counter!("backend_attempts_total", "backend" => answered.name.clone(), "outcome" => "ok")
                    .increment(1);
                histogram!("backend_latency_ms").record(answered.elapsed.as_secs_f64() * 1_000.0);
                tracing::info!(
                    target: "analyze",
                    code = %instrument.code,
                    backend = %answered.name,
                    action = answered.value.action.as_str(),
                    skipped = answered.skipped.len(),
                    "decision produced"
                );
                Ok(answered.value)
            }
            Err(failures) => {
                count_failures(&failures);
                Err(NoBackendAvailable { failures })
            }
        }
    }
}

fn count_failures(failures: &[Attempted<BackendFailure>]) {
    for f in failures {
        counter!(
            "backend_attempts_total",
            "backend" => f.name.clone(),
            "outcome" => f.failure.label()
        )
        .increment(1);
    }
}
