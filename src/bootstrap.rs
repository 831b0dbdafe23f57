// src/bootstrap.rs
//! Builds the runtime objects from a loaded `AppConfig`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analyze::BackendSelector;
use crate::config::AppConfig;
use crate::ingest::providers::eastmoney::EastmoneyProvider;
use crate::ingest::providers::fundgz::FundgzProvider;
use crate::ingest::providers::news_rss::RssNewsProvider;
use crate::ingest::providers::tavily::TavilyProvider;
use crate::ingest::types::{DataKind, Provider};
use crate::ingest::ProviderChain;
use crate::model::{FundSnapshot, NewsItem};
use crate::notify::{ChannelHandle, Dispatcher};
use crate::pacer::Pacer;
use crate::pipeline::Pipeline;
use crate::tasks::TaskTracker;

/// Everything a run or the API needs, built once at startup.
pub struct Runtime {
    pub config: AppConfig,
    pub pipeline: Pipeline,
    pub dispatcher: Dispatcher,
    pub channels: Arc<Vec<ChannelHandle>>,
    pub tracker: Arc<TaskTracker>,
}

impl Runtime {
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let pipeline = Pipeline::new(
            fund_data_chain(&config),
            news_chain(&config),
            backend_selector(&config),
            Arc::new(Pacer::new(config.pacing)),
            config.guard,
        );
        let channels = channels(&config)?;
        let dispatcher = Dispatcher::new(config.dispatch, config.detail);
        let tracker = Arc::new(TaskTracker::new(config.tasks));

        // Safe diagnostics: names only, never keys.
        info!(
            target: "bootstrap",
            instruments = config.instruments.len(),
            fund_data = ?config.providers.fund_data,
            news = ?config.providers.news,
            backends = ?config.backends.iter().filter(|b| b.enabled).map(|b| b.label()).collect::<Vec<_>>(),
            channels = ?channels.iter().filter(|c| c.enabled).map(|c| c.name.as_str()).collect::<Vec<_>>(),
            mode = ?config.mode,
            "runtime ready"
        );

        Ok(Self {
            config,
            pipeline,
            dispatcher,
            channels: Arc::new(channels),
            tracker,
        })
    }
}

pub fn fund_data_chain(cfg: &AppConfig) -> ProviderChain<FundSnapshot> {
    let p = &cfg.providers;
    let timeout = cfg.timeouts.provider();
    let providers: Vec<Arc<dyn Provider<FundSnapshot>>> = p
        .fund_data
        .iter()
        .filter_map(|name| -> Option<Arc<dyn Provider<FundSnapshot>>> {
            match name.as_str() {
                "eastmoney" => {
                    let mut em = EastmoneyProvider::http(p.eastmoney_url.as_deref(), timeout)
                        .with_points(p.nav_points);
                    if p.fund_profile {
                        em = em.with_profile(p.eastmoney_profile_url.as_deref());
                    }
                    Some(Arc::new(em))
                }
                "fundgz" => Some(Arc::new(FundgzProvider::http(p.fundgz_url.as_deref(), timeout))),
                other => {
                    warn!(target: "bootstrap", provider = other, "unknown fund-data provider skipped");
                    None
                }
            }
        })
        .collect();
    ProviderChain::new(DataKind::FundData, providers, timeout)
}

pub fn news_chain(cfg: &AppConfig) -> ProviderChain<Vec<NewsItem>> {
    let p = &cfg.providers;
    let timeout = cfg.timeouts.provider();
    let providers: Vec<Arc<dyn Provider<Vec<NewsItem>>>> = p
        .news
        .iter()
        .filter_map(|name| -> Option<Arc<dyn Provider<Vec<NewsItem>>>> {
            match name.as_str() {
                "rss" => Some(Arc::new(
                    RssNewsProvider::http(p.rss_url.as_deref(), timeout).with_max_items(p.max_news),
                )),
                "tavily" => Some(Arc::new(
                    TavilyProvider::http(p.tavily_api_key.clone(), p.tavily_url.as_deref(), timeout)
                        .with_max_items(p.max_news)
                        .with_days(p.news_days),
                )),
                other => {
                    warn!(target: "bootstrap", provider = other, "unknown news provider skipped");
                    None
                }
            }
        })
        .collect();
    ProviderChain::new(DataKind::NewsSearch, providers, timeout)
}

pub fn backend_selector(cfg: &AppConfig) -> BackendSelector {
    let timeout = cfg.timeouts.backend();
    let backends: Vec<_> = cfg
        .backends
        .iter()
        .filter(|b| b.enabled)
        .map(|b| b.build(timeout))
        .collect();
    if backends.is_empty() {
        warn!(target: "bootstrap", "no analysis backend configured; every analysis will fail");
    }
    BackendSelector::new(backends, timeout)
}

pub fn channels(cfg: &AppConfig) -> Result<Vec<ChannelHandle>> {
    let timeout = cfg.dispatch.timeout();
    cfg.channels
        .iter()
        .map(|t| {
            ChannelHandle::from_target(t, timeout)
                .with_context(|| format!("building channel {}", t.name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_follow_configured_order() {
        let mut cfg = AppConfig::default();
        cfg.providers.fund_data = vec!["fundgz".into(), "eastmoney".into()];
        cfg.providers.news = vec!["tavily".into(), "rss".into()];
        cfg.providers.tavily_api_key = "tvly-test".into();

        assert_eq!(fund_data_chain(&cfg).names(), vec!["fundgz", "eastmoney"]);
        assert_eq!(news_chain(&cfg).names(), vec!["tavily", "rss"]);
        assert!(backend_selector(&cfg).is_empty());
    }

    #[test]
    fn runtime_builds_from_defaults() {
        let rt = Runtime::from_config(AppConfig::default()).unwrap();
        assert!(rt.channels.is_empty());
        assert!(rt.tracker.is_empty());
    }
}
