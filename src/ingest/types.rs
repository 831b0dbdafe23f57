// src/ingest/types.rs
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderFailure;
use crate::model::Instrument;

/// What a provider chain fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    FundData,
    NewsSearch,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FundData => "fund_data",
            Self::NewsSearch => "news_search",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single data source. One attempt per call; retries are the chain's job
/// (by moving on to the next provider).
#[async_trait]
pub trait Provider<T>: Send + Sync {
    async fn fetch(&self, instrument: &Instrument) -> Result<T, ProviderFailure>;
    fn name(&self) -> &str;
}
