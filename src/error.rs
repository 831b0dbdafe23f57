//! Error taxonomy for the analysis and delivery pipeline.
//!
//! Transient failures (`ProviderFailure`, `BackendFailure`) drive fallback
//! inside a chain; the terminal variants are what a chain reports once every
//! candidate has been tried.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::ingest::types::DataKind;

/// One provider's failed attempt. Triggers fallback to the next provider.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderFailure {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("rate limited")]
    RateLimited,

    #[error("http error: {message}")]
    Http { message: String },

    #[error("malformed response: {message}")]
    Malformed { message: String },

    #[error("no data for instrument")]
    Empty,
}

impl ProviderFailure {
    pub fn http(e: impl fmt::Display) -> Self {
        Self::Http {
            message: e.to_string(),
        }
    }

    pub fn malformed(e: impl fmt::Display) -> Self {
        Self::Malformed {
            message: e.to_string(),
        }
    }

    /// Map a reqwest error, keeping 429 and timeouts distinguishable.
    pub fn from_reqwest(e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            Self::Timeout { secs: timeout_secs }
        } else if e.status().is_some_and(|s| s.as_u16() == 429) {
            Self::RateLimited
        } else {
            Self::http(e)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Http { .. } => "http",
            Self::Malformed { .. } => "malformed",
            Self::Empty => "empty",
        }
    }
}

/// One backend's failed attempt. "Unreachable" and "returned garbage" both
/// land here so the selector treats them the same way.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendFailure {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("backend not configured: {message}")]
    NotConfigured { message: String },

    #[error("http error: {message}")]
    Http { message: String },

    #[error("malformed decision: {message}")]
    Malformed { message: String },
}

impl BackendFailure {
    pub fn http(e: impl fmt::Display) -> Self {
        Self::Http {
            message: e.to_string(),
        }
    }

    pub fn malformed(e: impl fmt::Display) -> Self {
        Self::Malformed {
            message: e.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::NotConfigured { .. } => "not_configured",
            Self::Http { .. } => "http",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// A named failure collected by an ordered fallback run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempted<E> {
    pub name: String,
    pub failure: E,
}

impl<E: fmt::Display> fmt::Display for Attempted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.failure)
    }
}

fn join_attempts<E: fmt::Display>(items: &[Attempted<E>]) -> String {
    if items.is_empty() {
        return "no candidates configured".to_string();
    }
    items
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every provider in a chain failed. Carries one reason per provider.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("all {kind} providers failed: {}", join_attempts(.failures))]
pub struct AllProvidersFailed {
    pub kind: DataKind,
    pub failures: Vec<Attempted<ProviderFailure>>,
}

/// Every backend failed or returned an unusable decision.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("no analysis backend available: {}", join_attempts(.failures))]
pub struct NoBackendAvailable {
    pub failures: Vec<Attempted<BackendFailure>>,
}

/// A channel exhausted its attempts. Reported for that channel only.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("delivery via {channel} failed after {attempts} attempt(s): {reason}")]
pub struct ChannelDeliveryFailure {
    pub channel: String,
    pub attempts: u32,
    pub reason: String,
}

fn downgrade_note(downgraded: &bool) -> &'static str {
    if *downgraded {
        " (buy downgraded to hold)"
    } else {
        ""
    }
}

/// A backend decision broke the chase-high rail and was corrected.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("chase-high rail corrected decision for {code}: change {change_pct:+.2}% > {threshold_pct:.2}%{}", downgrade_note(.downgraded))]
pub struct ValidationFailure {
    pub code: String,
    pub change_pct: f64,
    pub threshold_pct: f64,
    pub downgraded: bool,
}

/// Terminal outcome of one instrument's pipeline run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PipelineFailure {
    #[error("data unavailable: {source}")]
    DataUnavailable { source: AllProvidersFailed },

    #[error("analysis unavailable: {source}")]
    AnalysisUnavailable { source: NoBackendAvailable },
}

impl PipelineFailure {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::AnalysisUnavailable { .. } => "analysis_unavailable",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("task store full: {capacity} tasks still in flight")]
    AtCapacity { capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_providers_failed_lists_every_reason() {
        let err = AllProvidersFailed {
            kind: DataKind::FundData,
            failures: vec![
                Attempted {
                    name: "eastmoney".into(),
                    failure: ProviderFailure::RateLimited,
                },
                Attempted {
                    name: "fundgz".into(),
                    failure: ProviderFailure::Empty,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("eastmoney: rate limited"), "{msg}");
        assert!(msg.contains("fundgz: no data"), "{msg}");
    }

    #[test]
    fn empty_chain_message_is_explicit() {
        let err = NoBackendAvailable { failures: vec![] };
        assert!(err.to_string().contains("no candidates configured"));
    }
}
