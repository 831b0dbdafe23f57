//! runner.rs: the scheduled batch run.
//!
//! Instruments are processed one after another (the pacer spaces the external
//! calls). In dashboard mode everything is sent once at the end; in immediate
//! mode each instrument is sent as soon as it finishes.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::bootstrap::Runtime;
use crate::config::RunMode;
use crate::model::Instrument;
use crate::notify::{ChannelHandle, DispatchReport, Dispatcher, Payload, ReportEntry};
use crate::pipeline::Pipeline;

/// What one batch produced.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// One entry per instrument, in processing order.
    pub entries: Vec<ReportEntry>,
    pub reports: Vec<DispatchReport>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ReportEntry::Failed { .. }))
            .count()
    }
}

pub async fn run_batch(rt: &Runtime) -> BatchSummary {
    run_instruments(
        &rt.pipeline,
        &rt.dispatcher,
        &rt.channels,
        &rt.config.instruments,
        rt.config.mode,
    )
    .await
}

/// Analyze `instruments` in order and deliver per `mode`. A failed instrument
/// becomes a failure entry; it never stops the rest of the batch.
pub async fn run_instruments(
    pipeline: &Pipeline,
    dispatcher: &Dispatcher,
    channels: &[ChannelHandle],
    instruments: &[Instrument],
    mode: RunMode,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    tracing::info!(target: "runner", instruments = instruments.len(), mode = ?mode, "batch started");

    for instrument in instruments {
        let result = pipeline.run_logged(instrument).await;
        let entry = ReportEntry::from_result(instrument, &result);

        if mode == RunMode::Immediate && !channels.is_empty() {
            let payload = match result {
                Ok(decision) => Payload::Single(decision),
                Err(_) => Payload::dashboard(vec![entry.clone()]),
            };
            summary.reports.push(dispatcher.dispatch(&payload, channels).await);
        }
        summary.entries.push(entry);
    }

    if mode == RunMode::Dashboard && !channels.is_empty() && !summary.entries.is_empty() {
        let payload = Payload::dashboard(summary.entries.clone());
        summary.reports.push(dispatcher.dispatch(&payload, channels).await);
    }

    counter!("batch_runs_total").increment(1);
    gauge!("batch_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
    tracing::info!(
        target: "runner",
        instruments = summary.entries.len(),
        failed = summary.failed(),
        deliveries = summary.reports.len(),
        "batch finished"
    );
    summary
}

/// Run the batch on a fixed interval. A run that outlasts the interval makes
/// the scheduler skip the missed ticks.
pub fn spawn_scheduler(rt: Arc<Runtime>) -> JoinHandle<()> {
    let period = Duration::from_secs(rt.config.schedule.interval_secs.max(1));
    let start = if rt.config.schedule.run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let summary = run_batch(&rt).await;
            tracing::info!(target: "runner", failed = summary.failed(), "scheduled batch tick");
        }
    })
}
