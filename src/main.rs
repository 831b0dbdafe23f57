//! fund-pulse service entrypoint.
//! Boots the Axum API, the `/metrics` endpoint and (when enabled) the batch
//! scheduler.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;

use fund_pulse::api::{create_router, AppState};
use fund_pulse::telemetry::{init_tracing, Metrics};
use fund_pulse::{runner, AppConfig, Runtime};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default()?;
    let threshold = config.guard.chase_high_threshold_pct;
    let schedule = config.schedule;
    let rt = Arc::new(Runtime::from_config(config)?);

    let mut router = create_router(AppState::from_runtime(&rt));
    match Metrics::init(threshold) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics endpoint disabled"),
    }

    if schedule.enabled {
        tracing::info!(interval_secs = schedule.interval_secs, "batch scheduler enabled");
        runner::spawn_scheduler(Arc::clone(&rt));
    }

    Ok(router.into())
}
