//! Incoming-webhook style channels: one POST with a flavour-specific JSON body.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Channel, Markup, Rendered, WebhookFlavor};

#[derive(Clone)]
pub struct WebhookChannel {
    url: String,
    flavor: WebhookFlavor,
    client: Client,
}

#[derive(Serialize)]
struct DiscordEmbed<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct DiscordWebhookPayload<'a> {
    content: Option<String>,
    embeds: Vec<DiscordEmbed<'a>>,
}

impl WebhookChannel {
    pub fn new(url: &str, flavor: WebhookFlavor, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            flavor,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn body(&self, msg: &Rendered) -> Value {
        match self.flavor {
            WebhookFlavor::Generic => json!({ "title": msg.title, "text": msg.body }),
            WebhookFlavor::Discord => json!(DiscordWebhookPayload {
                content: None,
                embeds: vec![DiscordEmbed {
                    title: &msg.title,
                    description: &msg.body,
                }],
            }),
            WebhookFlavor::Slack => json!({ "text": format!("*{}*\n{}", msg.title, msg.body) }),
            WebhookFlavor::Wecom => json!({
                "msgtype": "markdown",
                "markdown": { "content": format!("## {}\n{}", msg.title, msg.body) }
            }),
            WebhookFlavor::Feishu => json!({
                "msg_type": "text",
                "content": { "text": format!("{}\n{}", msg.title, msg.body) }
            }),
        }
    }
}

/// WeCom and Feishu answer 200 with an error code in the body.
fn check_app_error(body: &str) -> Result<()> {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };
    for key in ["errcode", "code", "StatusCode"] {
        if let Some(code) = v.get(key).and_then(Value::as_i64) {
            if code != 0 {
                let msg = v
                    .get("errmsg")
                    .or_else(|| v.get("msg"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(anyhow!("webhook rejected message ({key}={code}): {msg}"));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Channel for WebhookChannel {
    fn markup(&self) -> Markup {
        match self.flavor {
            WebhookFlavor::Discord | WebhookFlavor::Wecom => Markup::Markdown,
            WebhookFlavor::Slack => Markup::Slack,
            WebhookFlavor::Generic | WebhookFlavor::Feishu => Markup::Plain,
        }
    }

    fn limit(&self) -> usize {
        match self.flavor {
            // Discord embed description cap.
            WebhookFlavor::Discord => 4_096,
            WebhookFlavor::Wecom => 4_000,
            WebhookFlavor::Slack | WebhookFlavor::Feishu => 20_000,
            WebhookFlavor::Generic => 50_000,
        }
    }

    async fn deliver(&self, message: &Rendered) -> Result<()> {
        let rsp = self
            .client
            .post(&self.url)
            .json(&self.body(message))
            .send()
            .await
            .context("webhook post")?
            .error_for_status()
            .context("webhook non-2xx")?;
        let text = rsp.text().await.unwrap_or_default();
        check_app_error(&text)
    }
}
