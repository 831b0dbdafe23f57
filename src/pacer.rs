//! pacer.rs: fixed spacing between external calls of the same kind.
//!
//! The pacer remembers when each kind was last released and sleeps until the
//! configured delay has passed. No jitter, no backoff.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    DataFetch,
    NewsSearch,
    AiBackend,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataFetch => "data_fetch",
            Self::NewsSearch => "news_search",
            Self::AiBackend => "ai_backend",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay per call kind, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub data_fetch_ms: u64,
    pub news_search_ms: u64,
    pub ai_backend_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            data_fetch_ms: 1_000,
            news_search_ms: 2_000,
            ai_backend_ms: 3_000,
        }
    }
}

impl PacingConfig {
    pub fn delay(&self, kind: CallKind) -> Duration {
        Duration::from_millis(match kind {
            CallKind::DataFetch => self.data_fetch_ms,
            CallKind::NewsSearch => self.news_search_ms,
            CallKind::AiBackend => self.ai_backend_ms,
        })
    }
}

/// One slot per kind, so a sleeping caller only holds up its own kind.
#[derive(Debug, Default)]
struct Slots {
    data_fetch: Mutex<Option<Instant>>,
    news_search: Mutex<Option<Instant>>,
    ai_backend: Mutex<Option<Instant>>,
}

impl Slots {
    fn get(&self, kind: CallKind) -> &Mutex<Option<Instant>> {
        match kind {
            CallKind::DataFetch => &self.data_fetch,
            CallKind::NewsSearch => &self.news_search,
            CallKind::AiBackend => &self.ai_backend,
        }
    }
}

#[derive(Debug)]
pub struct Pacer {
    cfg: PacingConfig,
    last: Slots,
}

impl Pacer {
    pub fn new(cfg: PacingConfig) -> Self {
        Self {
            cfg,
            last: Slots::default(),
        }
    }

    /// Same delay for every kind.
    pub fn uniform(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self::new(PacingConfig {
            data_fetch_ms: ms,
            news_search_ms: ms,
            ai_backend_ms: ms,
        })
    }

    /// Never sleeps.
    pub fn disabled() -> Self {
        Self::uniform(Duration::ZERO)
    }

    pub fn delay(&self, kind: CallKind) -> Duration {
        self.cfg.delay(kind)
    }

    /// Wait until `kind` may be called again, then mark it as called.
    ///
    /// The kind's lock is held across the sleep so concurrent callers of the
    /// same kind queue up one delay apart. Other kinds are not blocked.
    pub async fn wait(&self, kind: CallKind) {
        let delay = self.cfg.delay(kind);
        if delay.is_zero() {
            return;
        }
        let mut last = self.last.get(kind).lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + delay;
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(target: "pacer", kind = kind.as_str(), wait_ms = (ready_at - now).as_millis() as u64, "pacing");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
