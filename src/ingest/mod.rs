// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::error::{AllProvidersFailed, Attempted, ProviderFailure};
use crate::fallback;
use crate::model::{Instrument, Sourced};
use crate::ingest::types::{DataKind, Provider};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "provider_attempts_total",
            "Provider attempts by kind, provider and outcome."
        );
        describe_counter!(
            "provider_chain_exhausted_total",
            "Chain calls where every provider failed."
        );
        describe_histogram!(
            "provider_fetch_ms",
            "Latency of the answering provider in milliseconds."
        );
    });
}

/// Ordered list of interchangeable providers for one data kind.
pub struct ProviderChain<T> {
    kind: DataKind,
    providers: Vec<Arc<dyn Provider<T>>>,
    timeout: Duration,
}

impl<T> Clone for ProviderChain<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            providers: self.providers.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: Send + 'static> ProviderChain<T> {
    /// `providers` must already be in priority order.
    pub fn new(kind: DataKind, providers: Vec<Arc<dyn Provider<T>>>, timeout: Duration) -> Self {
        Self {
            kind,
            providers,
            timeout,
        }
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Try providers in order; the first success wins and is tagged with the
    /// provider's name. Exhaustion reports one reason per provider.
    pub async fn fetch(&self, instrument: &Instrument) -> Result<Sourced<T>, AllProvidersFailed> {
        ensure_metrics_described();
        let kind = self.kind.as_str();

        let result = fallback::first_success(
            kind,
            &self.providers,
            self.timeout,
            |p| p.name().to_string(),
            |d| ProviderFailure::Timeout { secs: d.as_secs() },
            |p| p.fetch(instrument),
        )
        .await;

        match result {
            Ok(answered) => {
                count_failures(kind, &answered.skipped);
                counter!(
                    "provider_attempts_total",
                    "kind" => kind,
                    "provider" => answered.name.clone(),
                    "outcome" => "ok"
                )
                .increment(1);
                histogram!("provider_fetch_ms", "kind" => kind)
                    .record(answered.elapsed.as_secs_f64() * 1_000.0);
                tracing::info!(
                    target: "ingest",
                    kind,
                    code = %instrument.code,
                    provider = %answered.name,
                    skipped = answered.skipped.len(),
                    "provider answered"
                );
                Ok(Sourced {
                    source: answered.name,
                    fetched_at: Utc::now(),
                    payload: answered.value,
                })
            }
            Err(failures) => {
                count_failures(kind, &failures);
                counter!("provider_chain_exhausted_total", "kind" => kind).increment(1);
                Err(AllProvidersFailed {
                    kind: self.kind,
                    failures,
                })
            }
        }
    }
}

fn count_failures(kind: &'static str, failures: &[Attempted<ProviderFailure>]) {
    for f in failures {
        counter!(
            "provider_attempts_total",
            "kind" => kind,
            "provider" => f.name.clone(),
            "outcome" => "failed",
            "reason" => f.failure.label()
        )
        .increment(1);
    }
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize curly quotes and guillemets to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 500 chars
    if out.chars().count() > 500 {
        out = out.chars().take(500).collect();
    }

    out
}
