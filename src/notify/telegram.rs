//! Telegram bot `sendMessage` with HTML parse mode.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Channel, Markup, Rendered};

const DEFAULT_API: &str = "https://api.telegram.org";

pub struct TelegramChannel {
    endpoint: String,
    chat_id: String,
    client: Client,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str, api_base: Option<&str>, timeout: Duration) -> Self {
        let base = api_base.unwrap_or(DEFAULT_API).trim_end_matches('/');
        Self {
            endpoint: format!("{base}/bot{bot_token}/sendMessage"),
            chat_id: chat_id.to_string(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn markup(&self) -> Markup {
        Markup::Html
    }

    fn limit(&self) -> usize {
        // 4096 minus room for the title line.
        3_900
    }

    async fn deliver(&self, message: &Rendered) -> Result<()> {
        let req = SendMessage {
            chat_id: &self.chat_id,
            text: format!(
                "<b>{}</b>\n{}",
                html_escape::encode_text(&message.title),
                message.body
            ),
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let rsp = self
            .client
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .context("telegram post")?;
        let status = rsp.status();
        let reply: ApiReply = rsp.json().await.context("telegram reply")?;
        if !status.is_success() || !reply.ok {
            return Err(anyhow!(
                "telegram rejected message ({status}): {}",
                reply.description.unwrap_or_default()
            ));
        }
        Ok(())
    }
}
