//! pipeline.rs: per-instrument analysis: data, news, backend, rail.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::analyze::indicators::short_horizon_change;
use crate::analyze::BackendSelector;
use crate::decision::Decision;
use crate::error::PipelineFailure;
use crate::guard::{enforce_chase_high, GuardConfig};
use crate::ingest::ProviderChain;
use crate::model::{FundSnapshot, Instrument, NewsDigest, NewsItem, ProviderResult};
use crate::pacer::{CallKind, Pacer};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs by outcome.");
        describe_histogram!(
            "pipeline_duration_ms",
            "Wall time of one instrument's pipeline run in milliseconds."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    FetchingData,
    FetchingNews,
    Analyzing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::FetchingData => "fetching_data",
            Self::FetchingNews => "fetching_news",
            Self::Analyzing => "analyzing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one pipeline step.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Success(T),
    /// The step failed but the run continues with `fallback`.
    OptionalFailure { fallback: T, reason: String },
    /// The step failed and the run ends.
    RequiredFailure(PipelineFailure),
}

impl<T> StepOutcome<T> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::OptionalFailure { .. } => "optional_failure",
            Self::RequiredFailure(_) => "required_failure",
        }
    }

    fn resolve(self, code: &str, stage: Stage) -> Result<T, PipelineFailure> {
        match self {
            Self::Success(v) => Ok(v),
            Self::OptionalFailure { fallback, reason } => {
                tracing::warn!(target: "pipeline", code, stage = stage.as_str(), reason = %reason, "optional step failed, continuing");
                Ok(fallback)
            }
            Self::RequiredFailure(e) => {
                tracing::error!(target: "pipeline", code, stage = stage.as_str(), error = %e, "required step failed");
                Err(e)
            }
        }
    }
}

/// Everything one instrument's run needs. Cheap to clone and share.
#[derive(Clone)]
pub struct Pipeline {
    fund_data: ProviderChain<FundSnapshot>,
    news: ProviderChain<Vec<NewsItem>>,
    selector: BackendSelector,
    pacer: Arc<Pacer>,
    guard: GuardConfig,
}

impl Pipeline {
    pub fn new(
        fund_data: ProviderChain<FundSnapshot>,
        news: ProviderChain<Vec<NewsItem>>,
        selector: BackendSelector,
        pacer: Arc<Pacer>,
        guard: GuardConfig,
    ) -> Self {
        Self {
            fund_data,
            news,
            selector,
            pacer,
            guard,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    async fn fetch_data(&self, instrument: &Instrument) -> StepOutcome<ProviderResult> {
        self.pacer.wait(CallKind::DataFetch).await;
        match self.fund_data.fetch(instrument).await {
            Ok(data) => StepOutcome::Success(data),
            Err(source) => StepOutcome::RequiredFailure(PipelineFailure::DataUnavailable { source }),
        }
    }

    async fn fetch_news(&self, instrument: &Instrument) -> StepOutcome<NewsDigest> {
        if self.news.is_empty() {
            return StepOutcome::Success(NewsDigest::empty());
        }
        self.pacer.wait(CallKind::NewsSearch).await;
        match self.news.fetch(instrument).await {
            Ok(items) => StepOutcome::Success(items.into()),
            Err(e) => StepOutcome::OptionalFailure {
                fallback: NewsDigest::empty(),
                reason: e.to_string(),
            },
        }
    }

    async fn analyze(
        &self,
        instrument: &Instrument,
        data: &ProviderResult,
        news: &NewsDigest,
        short_change: Option<f64>,
    ) -> StepOutcome<Decision> {
        self.pacer.wait(CallKind::AiBackend).await;
        match self.selector.analyze(instrument, data, news, short_change).await {
            Ok(d) => StepOutcome::Success(d),
            Err(source) => {
                StepOutcome::RequiredFailure(PipelineFailure::AnalysisUnavailable { source })
            }
        }
    }

    /// Run every stage for `instrument`, reporting each transition to
    /// `on_stage`. The last reported stage is `Done` or `Failed`.
    pub async fn run<F>(&self, instrument: &Instrument, mut on_stage: F) -> Result<Decision, PipelineFailure>
    where
        F: FnMut(Stage) + Send,
    {
        ensure_metrics_described();
        let t0 = Instant::now();
        on_stage(Stage::Pending);

        let result = self.run_stages(instrument, &mut on_stage).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        on_stage(if result.is_ok() { Stage::Done } else { Stage::Failed });
        counter!("pipeline_runs_total", "outcome" => outcome).increment(1);
        histogram!("pipeline_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        result
    }

    /// `run` with stage transitions sent to the log.
    pub async fn run_logged(&self, instrument: &Instrument) -> Result<Decision, PipelineFailure> {
        let code = instrument.code.clone();
        self.run(instrument, move |stage| {
            tracing::debug!(target: "pipeline", code = %code, stage = stage.as_str(), "stage");
        })
        .await
    }

    async fn run_stages<F>(&self, instrument: &Instrument, on_stage: &mut F) -> Result<Decision, PipelineFailure>
    where
        F: FnMut(Stage) + Send,
    {
        let code = instrument.code.as_str();

        on_stage(Stage::FetchingData);
        let data = self.fetch_data(instrument).await.resolve(code, Stage::FetchingData)?;
        let instrument = with_reported_name(instrument, &data.payload);

        on_stage(Stage::FetchingNews);
        let news = self.fetch_news(&instrument).await.resolve(code, Stage::FetchingNews)?;

        on_stage(Stage::Analyzing);
        let short_change = short_horizon_change(&data.payload, self.guard.short_horizon_points);
        let decision = self
            .analyze(&instrument, &data, &news, short_change)
            .await
            .resolve(code, Stage::Analyzing)?;

        let (decision, correction) =
            enforce_chase_high(decision, short_change, self.guard.chase_high_threshold_pct);
        if let Some(v) = correction {
            tracing::info!(target: "pipeline", code, correction = %v, "decision corrected");
        }

        tracing::info!(
            target: "pipeline",
            code,
            data_source = %data.source,
            news_items = news.len(),
            backend = %decision.backend,
            action = decision.action.as_str(),
            "instrument analyzed"
        );
        Ok(decision)
    }
}

/// Adopt the provider's fund name when config only gave a code.
fn with_reported_name(instrument: &Instrument, snap: &FundSnapshot) -> Instrument {
    match snap.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() && instrument.display_name() == instrument.code => {
            instrument.clone().named(name)
        }
        _ => instrument.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_name_only_fills_blank_names() {
        let snap = FundSnapshot {
            name: Some("E Fund Blue Chip".into()),
            ..FundSnapshot::default()
        };
        assert_eq!(
            with_reported_name(&Instrument::new("005827"), &snap).name,
            "E Fund Blue Chip"
        );
        assert_eq!(
            with_reported_name(&Instrument::new("005827").named("Mine"), &snap).name,
            "Mine"
        );
    }

    #[test]
    fn optional_failure_resolves_to_fallback() {
        let s: StepOutcome<NewsDigest> = StepOutcome::OptionalFailure {
            fallback: NewsDigest::empty(),
            reason: "rss: empty".into(),
        };
        assert_eq!(s.label(), "optional_failure");
        assert!(s.resolve("x", Stage::FetchingNews).unwrap().is_empty());
    }
}
