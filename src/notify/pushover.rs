//! Pushover push notifications.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::format::truncate_chars;
use super::{Channel, Markup, Rendered};

const DEFAULT_URL: &str = "https://api.pushover.net/1/messages.json";
/// Pushover rejects messages longer than this.
pub const MESSAGE_LIMIT: usize = 1_024;
const TITLE_LIMIT: usize = 250;

pub struct PushoverChannel {
    url: String,
    user_key: String,
    api_token: String,
    client: Client,
}

#[derive(Serialize)]
struct PushReq<'a> {
    token: &'a str,
    user: &'a str,
    title: String,
    message: &'a str,
}

impl PushoverChannel {
    pub fn new(user_key: &str, api_token: &str, api_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            url: api_url.unwrap_or(DEFAULT_URL).to_string(),
            user_key: user_key.to_string(),
            api_token: api_token.to_string(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Channel for PushoverChannel {
    fn markup(&self) -> Markup {
        Markup::Plain
    }

    fn limit(&self) -> usize {
        MESSAGE_LIMIT
    }

    async fn deliver(&self, message: &Rendered) -> Result<()> {
        let req = PushReq {
            token: &self.api_token,
            user: &self.user_key,
            title: truncate_chars(&message.title, TITLE_LIMIT),
            message: &message.body,
        };
        let rsp = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .context("pushover post")?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(anyhow!("pushover status {status}: {body}"));
        }
        Ok(())
    }
}
