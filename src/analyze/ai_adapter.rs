//! AI adapter: backend abstraction plus the concrete backends.
//!
//! A backend does one remote call and returns the raw reply text. Parsing and
//! validation happen in the selector so every backend is judged the same way.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::prompt::Prompt;
use crate::error::BackendFailure;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<String, BackendFailure>> + Send + 'a>>;

/// Trait object used by the selector (and tests).
pub trait AnalysisBackend: Send + Sync {
    /// Send the prompt and return the raw reply text.
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> BackendFuture<'a>;
    /// Backend name for diagnostics and the decision's `backend` field.
    fn name(&self) -> &str;
}

pub type DynBackend = Arc<dyn AnalysisBackend>;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("fund-pulse/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn map_reqwest(e: reqwest::Error, timeout: Duration) -> BackendFailure {
    if e.is_timeout() {
        BackendFailure::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        BackendFailure::http(e)
    }
}

// ------------------------------------------------------------
// Gemini (generateContent REST)
// ------------------------------------------------------------

pub struct GeminiBackend {
    label: String,
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiBackend {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";
    pub const DEFAULT_BASE: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(
        label: impl Into<String>,
        api_key: impl Into<String>,
        model: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            http: http_client(timeout),
            api_key: api_key.into(),
            model: model.unwrap_or(Self::DEFAULT_MODEL).to_string(),
            base_url: base_url.unwrap_or(Self::DEFAULT_BASE).trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn call(&self, prompt: &Prompt) -> Result<String, BackendFailure> {
        if self.api_key.is_empty() {
            return Err(BackendFailure::NotConfigured {
                message: "missing Gemini API key".into(),
            });
        }

        #[derive(Serialize)]
        struct Part<'a> {
            text: &'a str,
        }
        #[derive(Serialize)]
        struct Content<'a> {
            role: &'a str,
            parts: Vec<Part<'a>>,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct GenConfig {
            temperature: f32,
            response_mime_type: &'static str,
        }
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Req<'a> {
            system_instruction: Content<'a>,
            contents: Vec<Content<'a>>,
            generation_config: GenConfig,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Option<RespContent>,
        }
        #[derive(Deserialize)]
        struct RespContent {
            #[serde(default)]
            parts: Vec<RespPart>,
        }
        #[derive(Deserialize)]
        struct RespPart {
            #[serde(default)]
            text: String,
        }

        let req = Req {
            system_instruction: Content {
                role: "system",
                parts: vec![Part {
                    text: &prompt.system,
                }],
            },
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &prompt.user }],
            }],
            generation_config: GenConfig {
                temperature: 0.3,
                response_mime_type: "application/json",
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendFailure::Http {
                message: format!("gemini status {status}"),
            });
        }
        let body: Resp = resp.json().await.map_err(BackendFailure::malformed)?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendFailure::malformed("empty Gemini reply"));
        }
        Ok(text)
    }
}

impl AnalysisBackend for GeminiBackend {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> BackendFuture<'a> {
        Box::pin(self.call(prompt))
    }
    fn name(&self) -> &str {
        &self.label
    }
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions (OpenAI, DeepSeek, Ollama, LM Studio)
// ------------------------------------------------------------

pub struct OpenAiCompatBackend {
    label: String,
    http: reqwest::Client,
    /// Empty for local endpoints that need no key.
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiCompatBackend {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    pub const DEFAULT_BASE: &'static str = "https://api.openai.com/v1";

    pub fn new(
        label: impl Into<String>,
        api_key: impl Into<String>,
        model: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            http: http_client(timeout),
            api_key: api_key.into(),
            model: model.unwrap_or(Self::DEFAULT_MODEL).to_string(),
            base_url: base_url.unwrap_or(Self::DEFAULT_BASE).trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn call(&self, prompt: &Prompt) -> Result<String, BackendFailure> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &prompt.system,
                },
                Msg {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.3,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&req);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let resp = builder.send().await.map_err(|e| map_reqwest(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendFailure::Http {
                message: format!("{} status {status}", self.label),
            });
        }
        let body: Resp = resp.json().await.map_err(BackendFailure::malformed)?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(BackendFailure::malformed("empty completion"));
        }
        Ok(content)
    }
}

impl AnalysisBackend for OpenAiCompatBackend {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> BackendFuture<'a> {
        Box::pin(self.call(prompt))
    }
    fn name(&self) -> &str {
        &self.label
    }
}

// ------------------------------------------------------------
// Mock backend for tests/local runs
// ------------------------------------------------------------

/// What the mock answers with on each call.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(BackendFailure),
    /// Sleep, then answer. Exercises the selector timeout.
    Slow(Duration, String),
}

/// Deterministic backend. Replies are consumed in order; the last one repeats.
pub struct MockBackend {
    label: String,
    replies: Mutex<Vec<MockReply>>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(label: impl Into<String>, reply: MockReply) -> Self {
        Self::sequence(label, vec![reply])
    }

    pub fn sequence(label: impl Into<String>, replies: Vec<MockReply>) -> Self {
        Self {
            label: label.into(),
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        }
    }

    /// A well-formed reply with the given action.
    pub fn answering(label: impl Into<String>, action: &str) -> Self {
        Self::new(label, MockReply::Text(canned_reply(action)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> MockReply {
        let mut g = self.replies.lock().unwrap_or_else(|p| p.into_inner());
        match g.len() {
            0 => MockReply::Fail(BackendFailure::NotConfigured {
                message: "mock has no replies".into(),
            }),
            1 => g[0].clone(),
            _ => g.remove(0),
        }
    }
}

/// JSON reply in the shape the selector expects.
pub fn canned_reply(action: &str) -> String {
    serde_json::json!({
        "action": action,
        "headline": format!("Mock analysis suggests {action}"),
        "checklist": [
            {"condition": "trend alignment", "status": "pass"},
            {"condition": "chase-high", "status": "pass"}
        ],
        "levels": {"entry": 1.0, "stop": 0.92, "target": 1.15},
        "narrative": "Deterministic mock reply."
    })
    .to_string()
}

impl AnalysisBackend for MockBackend {
    fn complete<'a>(&'a self, _prompt: &'a Prompt) -> BackendFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();
        Box::pin(async move {
            match reply {
                MockReply::Text(t) => Ok(t),
                MockReply::Fail(f) => Err(f),
                MockReply::Slow(d, t) => {
                    tokio::time::sleep(d).await;
                    Ok(t)
                }
            }
        })
    }
    fn name(&self) -> &str {
        &self.label
    }
}
