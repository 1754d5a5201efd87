use anyhow::{anyhow, Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Notifier;
use crate::config::EmailConfig;
use crate::digest::{render, Digest};

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    send_when_empty: bool,
}

impl EmailNotifier {
    pub fn from_config(cfg: &EmailConfig) -> Result<Self> {
        let user = cfg.username.clone().unwrap_or_else(|| cfg.from.clone());
        let creds = Credentials::new(user, cfg.password.expose().to_string());

        // Port 465 speaks TLS from the first byte; everything else upgrades via STARTTLS.
        let relay = if cfg.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
        };
        let builder =
            relay.with_context(|| format!("invalid email.smtp_host {:?}", cfg.smtp_host))?;
        let mailer = builder.port(cfg.smtp_port).credentials(creds).build();

        let from: Mailbox = cfg
            .from
            .parse()
            .with_context(|| format!("invalid email.from {:?}", cfg.from))?;
        let to = cfg
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("invalid email.to entry {addr:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        if to.is_empty() {
            return Err(anyhow!("email.to must list at least one recipient"));
        }

        Ok(Self {
            mailer,
            from,
            to,
            send_when_empty: cfg.send_when_empty,
        })
    }

    pub fn build_message(&self, digest: &Digest) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(render::subject(digest))
            .header(header::ContentType::TEXT_PLAIN);
        for rcpt in &self.to {
            builder = builder.to(rcpt.clone());
        }
        builder
            .body(render::render_text(digest))
            .context("build email")
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    fn send_when_empty(&self) -> bool {
        self.send_when_empty
    }

    async fn deliver(&self, digest: &Digest) -> Result<()> {
        let msg = self.build_message(digest)?;
        self.mailer.send(msg).await.context("send email")?;
        tracing::debug!(recipients = self.to.len(), "email accepted by relay");
        Ok(())
    }
}
