// src/config/ai.rs
//! Analysis backend entries and secret resolution.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;

use crate::analyze::ai_adapter::{DynBackend, GeminiBackend, MockBackend, OpenAiCompatBackend};

/// Resolve a secret that may be given indirectly.
///
/// `"ENV"` reads `default_var`; `"env:NAME"` reads `NAME`; anything else is
/// taken literally.
pub fn resolve_secret(value: &str, default_var: &str) -> Result<String> {
    let v = value.trim();
    let var = if v.eq_ignore_ascii_case("env") {
        default_var
    } else if let Some(name) = v.strip_prefix("env:") {
        name.trim()
    } else {
        return Ok(v.to_string());
    };
    env::var(var).map_err(|_| anyhow!("Missing {var} env var"))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    Gemini,
    /// Any OpenAI-compatible chat completions endpoint.
    Openai,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendConfig {
    pub provider: BackendProvider,
    /// Name shown in decisions and logs. Defaults to the provider.
    #[serde(default)]
    pub name: Option<String>,
    /// `"ENV"` means: read from GEMINI_API_KEY / OPENAI_API_KEY (by provider).
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| match self.provider {
            BackendProvider::Gemini => "gemini".to_string(),
            BackendProvider::Openai => "openai".to_string(),
            BackendProvider::Mock => "mock".to_string(),
        })
    }

    fn env_var(&self) -> &'static str {
        match self.provider {
            BackendProvider::Gemini => "GEMINI_API_KEY",
            BackendProvider::Openai => "OPENAI_API_KEY",
            BackendProvider::Mock => "MOCK_API_KEY",
        }
    }

    /// Resolve `ENV` keys in place. Local OpenAI-compatible endpoints may run
    /// without a key; Gemini may not.
    pub fn resolve(&mut self) -> Result<()> {
        if self.provider == BackendProvider::Mock {
            return Ok(());
        }
        self.api_key = resolve_secret(&self.api_key, self.env_var())?;
        if self.provider == BackendProvider::Gemini && self.api_key.is_empty() {
            bail!("backend {}: Gemini requires an api_key", self.label());
        }
        Ok(())
    }

    pub fn build(&self, timeout: Duration) -> DynBackend {
        let label = self.label();
        match self.provider {
            BackendProvider::Gemini => Arc::new(GeminiBackend::new(
                label,
                self.api_key.clone(),
                self.model.as_deref(),
                self.base_url.as_deref(),
                timeout,
            )),
            BackendProvider::Openai => Arc::new(OpenAiCompatBackend::new(
                label,
                self.api_key.clone(),
                self.model.as_deref(),
                self.base_url.as_deref(),
                timeout,
            )),
            BackendProvider::Mock => Arc::new(MockBackend::answering(label, "hold")),
        }
    }
}
