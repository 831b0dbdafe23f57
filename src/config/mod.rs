// src/config/mod.rs
//! Application configuration: one TOML file plus a few env overrides.
//!
//! Lookup order for the file:
//! 1) $FUND_PULSE_CONFIG (must exist)
//! 2) config/fund-pulse.toml
//! 3) built-in defaults
//!
//! Then `FUND_CODES`, `FUND_PULSE_MODE`, `REPORT_DETAIL` and `AI_TEST_MODE`
//! are applied, and `ENV` secrets are resolved.

pub mod ai;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::guard::GuardConfig;
use crate::model::{is_valid_code, Instrument};
use crate::notify::{ChannelKind, ChannelTarget, DispatchPolicy, ReportDetail};
use crate::pacer::PacingConfig;
use crate::tasks::TaskConfig;

use self::ai::{resolve_secret, BackendConfig, BackendProvider};

pub const DEFAULT_CONFIG_PATH: &str = "config/fund-pulse.toml";
pub const ENV_CONFIG_PATH: &str = "FUND_PULSE_CONFIG";

pub const FUND_DATA_PROVIDERS: &[&str] = &["eastmoney", "fundgz"];
pub const NEWS_PROVIDERS: &[&str] = &["rss", "tavily"];

/// How finished decisions reach the channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One summary message after the whole run.
    #[default]
    Dashboard,
    /// One message per instrument as soon as it is decided.
    Immediate,
}

impl RunMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dashboard" | "batch" => Some(Self::Dashboard),
            "immediate" | "single" => Some(Self::Immediate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Fund-data providers in priority order.
    pub fund_data: Vec<String>,
    /// News providers in priority order. Empty disables news.
    pub news: Vec<String>,
    /// `"ENV"` means TAVILY_API_KEY.
    pub tavily_api_key: String,
    pub max_news: usize,
    pub news_days: u32,
    /// NAV history length requested from eastmoney.
    pub nav_points: usize,
    /// Also fetch manager, top holdings and reported stage returns.
    pub fund_profile: bool,
    pub eastmoney_url: Option<String>,
    pub eastmoney_profile_url: Option<String>,
    pub fundgz_url: Option<String>,
    pub rss_url: Option<String>,
    pub tavily_url: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            fund_data: vec!["eastmoney".into(), "fundgz".into()],
            news: vec!["rss".into()],
            tavily_api_key: "ENV".into(),
            max_news: 5,
            news_days: 7,
            nav_points: 120,
            fund_profile: true,
            eastmoney_url: None,
            eastmoney_profile_url: None,
            fundgz_url: None,
            rss_url: None,
            tavily_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub provider_secs: u64,
    pub backend_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            provider_secs: 10,
            backend_secs: 60,
        }
    }
}

impl TimeoutsConfig {
    pub fn provider(&self) -> Duration {
        Duration::from_secs(self.provider_secs.max(1))
    }

    pub fn backend(&self) -> Duration {
        Duration::from_secs(self.backend_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Run once immediately instead of waiting a full interval.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 24 * 3_600,
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub instruments: Vec<Instrument>,
    pub mode: RunMode,
    pub detail: ReportDetail,
    pub providers: ProvidersConfig,
    pub backends: Vec<BackendConfig>,
    pub channels: Vec<ChannelTarget>,
    pub pacing: PacingConfig,
    pub guard: GuardConfig,
    pub tasks: TaskConfig,
    pub timeouts: TimeoutsConfig,
    pub dispatch: DispatchPolicy,
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    /// Parse only; no env overrides, no secret resolution.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing fund-pulse config")
    }

    /// Load `path`, apply env overrides, resolve secrets and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)
            .with_context(|| format!("in {}", path.display()))?;
        cfg.finish()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        tracing::warn!(target: "config", "no config file found, using defaults");
        let mut cfg = Self::default();
        cfg.finish()?;
        Ok(cfg)
    }

    fn finish(&mut self) -> Result<()> {
        self.apply_env_overrides()?;
        self.resolve_secrets()?;
        self.validate()
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(codes) = env::var("FUND_CODES") {
            let listed: Vec<Instrument> = codes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| {
                    self.instruments
                        .iter()
                        .find(|i| i.code == c)
                        .cloned()
                        .unwrap_or_else(|| Instrument::new(c))
                })
                .collect();
            if !listed.is_empty() {
                self.instruments = listed;
            }
        }
        if let Ok(mode) = env::var("FUND_PULSE_MODE") {
            self.mode = RunMode::parse(&mode)
                .ok_or_else(|| anyhow!("FUND_PULSE_MODE must be dashboard or immediate, got {mode}"))?;
        }
        if let Ok(detail) = env::var("REPORT_DETAIL") {
            self.detail = ReportDetail::parse(&detail)
                .ok_or_else(|| anyhow!("REPORT_DETAIL must be simple or full, got {detail}"))?;
        }
        if env::var("AI_TEST_MODE").is_ok_and(|v| v.eq_ignore_ascii_case("mock")) {
            self.backends = vec![BackendConfig {
                provider: BackendProvider::Mock,
                name: Some("mock".into()),
                api_key: String::new(),
                model: None,
                base_url: None,
                enabled: true,
            }];
        }
        Ok(())
    }

    /// Replace `ENV` / `env:NAME` values in enabled entries.
    pub fn resolve_secrets(&mut self) -> Result<()> {
        for b in self.backends.iter_mut().filter(|b| b.enabled) {
            b.resolve()?;
        }
        if self.providers.news.iter().any(|n| n == "tavily") {
            self.providers.tavily_api_key =
                resolve_secret(&self.providers.tavily_api_key, "TAVILY_API_KEY")
                    .context("tavily news provider")?;
        }
        for ch in self.channels.iter_mut().filter(|c| c.enabled) {
            let name = ch.name.clone();
            match &mut ch.kind {
                ChannelKind::Webhook { url, .. } => {
                    *url = resolve_secret(url, "WEBHOOK_URL")?;
                }
                ChannelKind::Telegram {
                    bot_token, chat_id, ..
                } => {
                    *bot_token = resolve_secret(bot_token, "TELEGRAM_BOT_TOKEN")?;
                    *chat_id = resolve_secret(chat_id, "TELEGRAM_CHAT_ID")?;
                }
                ChannelKind::Email { password, .. } => {
                    *password = resolve_secret(password, "EMAIL_PASSWORD")?;
                }
                ChannelKind::Pushover {
                    user_key,
                    api_token,
                    ..
                } => {
                    *user_key = resolve_secret(user_key, "PUSHOVER_USER_KEY")?;
                    *api_token = resolve_secret(api_token, "PUSHOVER_API_TOKEN")?;
                }
            }
            tracing::debug!(target: "config", channel = %name, "channel secrets resolved");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for i in &self.instruments {
            if !is_valid_code(&i.code) {
                bail!("invalid instrument code {:?}", i.code);
            }
        }
        for p in &self.providers.fund_data {
            if !FUND_DATA_PROVIDERS.contains(&p.as_str()) {
                bail!("unknown fund-data provider {p:?} (known: {FUND_DATA_PROVIDERS:?})");
            }
        }
        for p in &self.providers.news {
            if !NEWS_PROVIDERS.contains(&p.as_str()) {
                bail!("unknown news provider {p:?} (known: {NEWS_PROVIDERS:?})");
            }
        }
        if self.providers.fund_data.is_empty() {
            bail!("at least one fund-data provider is required");
        }
        let threshold = self.guard.chase_high_threshold_pct;
        if threshold.is_nan() || threshold <= 0.0 {
            bail!("guard.chase_high_threshold_pct must be positive");
        }
        let mut names: Vec<&str> = self.channels.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            bail!("channel names must be unique");
        }
        Ok(())
    }
}
