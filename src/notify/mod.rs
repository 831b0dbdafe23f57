//! Notification fan-out: one formatted message per channel, delivered
//! concurrently with per-channel retries. A channel that gives up is reported
//! in the `DispatchReport`; it never stops the others.

pub mod email;
pub mod format;
pub mod pushover;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::decision::{Action, Decision};
use crate::error::{ChannelDeliveryFailure, PipelineFailure};
use crate::model::Instrument;

pub use format::{Markup, Rendered};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "dispatch_attempts_total",
            "Channel delivery attempts by channel and outcome."
        );
        describe_histogram!(
            "dispatch_duration_ms",
            "Time spent delivering to one channel, retries included."
        );
    });
}

// ------------------------------------------------------------
// Configuration shapes
// ------------------------------------------------------------

/// `simple` omits the backend narrative, `full` includes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportDetail {
    #[default]
    Simple,
    Full,
}

impl ReportDetail {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFlavor {
    #[default]
    Generic,
    Discord,
    Slack,
    Wecom,
    Feishu,
}

fn default_smtp_port() -> u16 {
    465
}

/// Connection parameters per channel kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelKind {
    Webhook {
        url: String,
        #[serde(default)]
        flavor: WebhookFlavor,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    Email {
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        username: String,
        password: String,
        from: String,
        to: Vec<String>,
    },
    Pushover {
        user_key: String,
        api_token: String,
        #[serde(default)]
        api_url: Option<String>,
    },
}

impl ChannelKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Webhook { .. } => "webhook",
            Self::Telegram { .. } => "telegram",
            Self::Email { .. } => "email",
            Self::Pushover { .. } => "pushover",
        }
    }
}

fn default_true() -> bool {
    true
}

/// One configured destination.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelTarget {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_channel_timeout_secs() -> u64 {
    10
}

/// Bounded retry with exponential backoff (`backoff_ms << (attempt - 1)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_channel_timeout_secs(),
        }
    }
}

impl DispatchPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Delay before retry number `attempt` (1-based attempt that just failed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.backoff_ms << shift)
    }
}

// ------------------------------------------------------------
// Payloads
// ------------------------------------------------------------

/// One line of a dashboard: a decision, or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportEntry {
    Decided(Decision),
    Failed {
        code: String,
        name: String,
        reason: String,
    },
}

impl ReportEntry {
    pub fn from_result(instrument: &Instrument, result: &Result<Decision, PipelineFailure>) -> Self {
        match result {
            Ok(d) => Self::Decided(d.clone()),
            Err(e) => Self::Failed {
                code: instrument.code.clone(),
                name: instrument.display_name().to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Buy, hold, sell, then failures.
    fn sort_key(&self) -> u8 {
        match self {
            Self::Decided(d) => d.action.rank(),
            Self::Failed { .. } => 3,
        }
    }
}

/// Counts for the dashboard header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOverview {
    pub total: usize,
    pub buy: usize,
    pub hold: usize,
    pub sell: usize,
    pub failed: usize,
    pub generated_at: DateTime<Utc>,
}

impl MarketOverview {
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        let mut o = Self {
            total: entries.len(),
            buy: 0,
            hold: 0,
            sell: 0,
            failed: 0,
            generated_at: Utc::now(),
        };
        for e in entries {
            match e {
                ReportEntry::Decided(d) => match d.action {
                    Action::Buy => o.buy += 1,
                    Action::Hold => o.hold += 1,
                    Action::Sell => o.sell += 1,
                },
                ReportEntry::Failed { .. } => o.failed += 1,
            }
        }
        o
    }

    pub fn header_line(&self) -> String {
        format!(
            "{} instruments | buy:{} hold:{} sell:{} failed:{}",
            self.total, self.buy, self.hold, self.sell, self.failed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Immediate mode: one instrument as soon as it is decided.
    Single(Decision),
    /// Dashboard mode: the whole run plus its overview.
    Dashboard {
        entries: Vec<ReportEntry>,
        overview: MarketOverview,
    },
}

impl Payload {
    /// Dashboard with entries sorted buy, hold, sell, failures.
    pub fn dashboard(mut entries: Vec<ReportEntry>) -> Self {
        entries.sort_by_key(|e| e.sort_key());
        let overview = MarketOverview::from_entries(&entries);
        Self::Dashboard { entries, overview }
    }
}

// ------------------------------------------------------------
// Channels
// ------------------------------------------------------------

/// A delivery destination. One call is one attempt; retries belong to the
/// dispatcher.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Markup this channel renders.
    fn markup(&self) -> Markup;
    /// Max body length in characters.
    fn limit(&self) -> usize;
    async fn deliver(&self, message: &Rendered) -> anyhow::Result<()>;
}

/// A named, possibly disabled channel ready for dispatch.
#[derive(Clone)]
pub struct ChannelHandle {
    pub name: String,
    pub enabled: bool,
    pub channel: Arc<dyn Channel>,
}

impl ChannelHandle {
    pub fn new(name: impl Into<String>, channel: Arc<dyn Channel>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            channel,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build the concrete channel for a configured target.
    pub fn from_target(target: &ChannelTarget, timeout: Duration) -> anyhow::Result<Self> {
        let channel: Arc<dyn Channel> = match &target.kind {
            ChannelKind::Webhook { url, flavor } => {
                Arc::new(webhook::WebhookChannel::new(url, *flavor, timeout))
            }
            ChannelKind::Telegram {
                bot_token,
                chat_id,
                api_base,
            } => Arc::new(telegram::TelegramChannel::new(
                bot_token,
                chat_id,
                api_base.as_deref(),
                timeout,
            )),
            ChannelKind::Email {
                smtp_host,
                smtp_port,
                username,
                password,
                from,
                to,
            } => Arc::new(email::EmailChannel::new(
                smtp_host, *smtp_port, username, password, from, to, timeout,
            )?),
            ChannelKind::Pushover {
                user_key,
                api_token,
                api_url,
            } => Arc::new(pushover::PushoverChannel::new(
                user_key,
                api_token,
                api_url.as_deref(),
                timeout,
            )),
        };
        Ok(Self {
            name: target.name.clone(),
            enabled: target.enabled,
            channel,
        })
    }
}

// ------------------------------------------------------------
// Dispatch
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered { attempts: u32 },
    Failed(ChannelDeliveryFailure),
    Skipped,
}

/// Per-channel outcomes, in the order the channels were given.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<(String, ChannelOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, o)| o)
    }

    pub fn delivered(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ChannelOutcome::Delivered { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ChannelOutcome::Failed(_)))
    }

    fn names_where(&self, pred: impl Fn(&ChannelOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    policy: DispatchPolicy,
    detail: ReportDetail,
}

impl Dispatcher {
    pub fn new(policy: DispatchPolicy, detail: ReportDetail) -> Self {
        Self { policy, detail }
    }

    pub fn detail(&self) -> ReportDetail {
        self.detail
    }

    /// Format and deliver `payload` to every enabled channel concurrently.
    pub async fn dispatch(&self, payload: &Payload, channels: &[ChannelHandle]) -> DispatchReport {
        ensure_metrics_described();
        let payload = Arc::new(payload.clone());
        let mut set = JoinSet::new();
        let mut outcomes: Vec<Option<ChannelOutcome>> = vec![None; channels.len()];

        for (idx, handle) in channels.iter().enumerate() {
            if !handle.enabled {
                tracing::debug!(target: "notify", channel = %handle.name, "channel disabled, skipping");
                outcomes[idx] = Some(ChannelOutcome::Skipped);
                continue;
            }
            let handle = handle.clone();
            let payload = Arc::clone(&payload);
            let policy = self.policy;
            let detail = self.detail;
            set.spawn(async move {
                let outcome = deliver_with_retry(&handle, &payload, policy, detail).await;
                (idx, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => tracing::error!(target: "notify", error = %e, "delivery task aborted"),
            }
        }

        let outcomes = channels
            .iter()
            .zip(outcomes)
            .map(|(h, o)| {
                let o = o.unwrap_or_else(|| {
                    ChannelOutcome::Failed(ChannelDeliveryFailure {
                        channel: h.name.clone(),
                        attempts: 0,
                        reason: "delivery task aborted".into(),
                    })
                });
                (h.name.clone(), o)
            })
            .collect();
        DispatchReport { outcomes }
    }
}

async fn deliver_with_retry(
    handle: &ChannelHandle,
    payload: &Payload,
    policy: DispatchPolicy,
    detail: ReportDetail,
) -> ChannelOutcome {
    let t0 = Instant::now();
    let channel = handle.channel.as_ref();
    let message = format::render(payload, channel.markup(), detail, channel.limit());
    let max_attempts = policy.max_attempts.max(1);

    let mut attempt: u32 = 0;
    let outcome = loop {
        attempt += 1;
        let res = match tokio::time::timeout(policy.timeout(), channel.deliver(&message)).await {
            Ok(r) => r,
            Err(_) => Err(anyhow::anyhow!("timed out after {}s", policy.timeout().as_secs())),
        };

        match res {
            Ok(()) => {
                counter!("dispatch_attempts_total", "channel" => handle.name.clone(), "outcome" => "ok")
                    .increment(1);
                tracing::info!(target: "notify", channel = %handle.name, attempts = attempt, "delivered");
                break ChannelOutcome::Delivered { attempts: attempt };
            }
            Err(e) => {
                counter!("dispatch_attempts_total", "channel" => handle.name.clone(), "outcome" => "error")
                    .increment(1);
                if attempt < max_attempts {
                    tracing::warn!(target: "notify", channel = %handle.name, attempt, error = %e, "delivery failed, retrying");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    continue;
                }
                let failure = ChannelDeliveryFailure {
                    channel: handle.name.clone(),
                    attempts: attempt,
                    reason: format!("{e:#}"),
                };
                tracing::error!(target: "notify", channel = %handle.name, error = %failure, "delivery failed");
                break ChannelOutcome::Failed(failure);
            }
        }
    };

    histogram!("dispatch_duration_ms", "channel" => handle.name.clone())
        .record(t0.elapsed().as_secs_f64() * 1_000.0);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::CheckStatus;

    fn decided(code: &str, action: Action) -> ReportEntry {
        ReportEntry::Decided(
            Decision::new(&Instrument::new(code), action, "x").with_check("trend", CheckStatus::Pass),
        )
    }

    #[test]
    fn dashboard_sorts_and_counts() {
        let p = Payload::dashboard(vec![
            ReportEntry::Failed {
                code: "000001".into(),
                name: "A".into(),
                reason: "data unavailable".into(),
            },
            decided("000002", Action::Sell),
            decided("000003", Action::Buy),
            decided("000004", Action::Hold),
        ]);
        let Payload::Dashboard { entries, overview } = p else {
            panic!("expected dashboard");
        };
        assert_eq!(overview.header_line(), "4 instruments | buy:1 hold:1 sell:1 failed:1");
        assert!(matches!(&entries[0], ReportEntry::Decided(d) if d.action == Action::Buy));
        assert!(matches!(&entries[3], ReportEntry::Failed { .. }));
    }

    #[test]
    fn backoff_doubles() {
        let p = DispatchPolicy {
            max_attempts: 3,
            backoff_ms: 500,
            timeout_secs: 5,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1_000));
        assert_eq!(p.backoff(3), Duration::from_millis(2_000));
    }

    #[test]
    fn channel_target_parses_flattened_kind() {
        let t: ChannelTarget = toml::from_str(
            r#"
name = "team-discord"
kind = "webhook"
url = "https://discord.test/hook"
flavor = "discord"
"#,
        )
        .unwrap();
        assert!(t.enabled);
        assert_eq!(
            t.kind,
            ChannelKind::Webhook {
                url: "https://discord.test/hook".into(),
                flavor: WebhookFlavor::Discord
            }
        );
    }
}
