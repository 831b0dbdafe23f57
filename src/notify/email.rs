use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Channel, Markup, Rendered};

pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// Port 465 uses implicit TLS; anything else negotiates STARTTLS.
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
        to: &[String],
        timeout: Duration,
    ) -> Result<Self> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let relay = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        };
        let builder = relay.with_context(|| format!("invalid SMTP host {host}"))?;
        let mailer = builder
            .port(port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build();

        let from: Mailbox = from
            .parse()
            .with_context(|| format!("invalid sender address {from}"))?;
        let to = to
            .iter()
            .map(|a| {
                a.parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address {a}"))
            })
            .collect::<Result<Vec<_>>>()?;
        anyhow::ensure!(!to.is_empty(), "email channel needs at least one recipient");

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn markup(&self) -> Markup {
        Markup::Plain
    }

    fn limit(&self) -> usize {
        100_000
    }

    async fn deliver(&self, message: &Rendered) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(message.title.clone())
            .header(header::ContentType::TEXT_PLAIN);
        for rcpt in &self.to {
            builder = builder.to(rcpt.clone());
        }
        let msg = builder.body(message.body.clone()).context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_addresses_without_panicking() {
        let err = EmailChannel::new(
            "smtp.example.com",
            465,
            "u",
            "p",
            "not an address",
            &["ops@example.com".to_string()],
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("invalid sender"));

        let err = EmailChannel::new(
            "smtp.example.com",
            587,
            "u",
            "p",
            "bot@example.com",
            &[],
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("recipient"));
    }
}
