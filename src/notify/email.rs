//! SMTP alert emails with a plain-text and an HTML body.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, instrument};

use super::Notifier;
use crate::{alerts::Severity, config::EmailConfig};

struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

/// Sends alerts over SMTP (STARTTLS).
///
/// Without credentials or recipients the notifier is disabled and every send
/// succeeds without doing anything.
pub struct EmailNotifier {
    mailer: Option<Mailer>,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let Some((username, password)) = config.credentials() else {
            info!("SMTP credentials missing, alert emails disabled");
            return Ok(Self::disabled());
        };

        if config.recipients.is_empty() {
            info!("no email recipients configured, alert emails disabled");
            return Ok(Self::disabled());
        }

        let from = config
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid sender address {}", config.from))?;
        let recipients = config
            .recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address {r}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .with_context(|| format!("invalid SMTP relay {}", config.smtp_host))?
            .port(config.smtp_port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        Ok(Self {
            mailer: Some(Mailer {
                transport,
                from,
                recipients,
            }),
        })
    }

    pub fn disabled() -> Self {
        Self { mailer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip(self, content))]
    async fn send_alert_email(
        &self,
        host: &str,
        severity: Severity,
        content: &str,
    ) -> anyhow::Result<()> {
        let Some(mailer) = &self.mailer else {
            debug!("SMTP not configured, skipping email for alert: {content}");
            return Ok(());
        };

        let time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

        let mut builder = Message::builder()
            .from(mailer.from.clone())
            .subject(subject(host, severity));
        for recipient in &mailer.recipients {
            builder = builder.to(recipient.clone());
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                render_text(host, severity, content, &time),
                render_html(host, severity, content, &time),
            ))
            .context("failed to build alert email")?;

        mailer
            .transport
            .send(message)
            .await
            .context("failed to send alert email")?;

        info!(
            "alert email sent to {} recipient(s) for {host}",
            mailer.recipients.len()
        );

        Ok(())
    }
}

fn subject(host: &str, severity: Severity) -> String {
    format!(
        "[fleetwarden] {} - {host}",
        severity.as_str().to_uppercase()
    )
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#dc3545",
        Severity::Warning => "#fd7e14",
        Severity::Info => "#0d6efd",
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn render_text(host: &str, severity: Severity, content: &str, time: &str) -> String {
    format!(
        "fleetwarden alert\n\
         \n\
         Severity: {}\n\
         Host:     {host}\n\
         Time:     {time}\n\
         \n\
         {content}\n\
         \n\
         Run `fleetwarden-hub alerts list --unseen` to review open alerts.\n",
        severity.as_str().to_uppercase()
    )
}

fn render_html(host: &str, severity: Severity, content: &str, time: &str) -> String {
    let color = severity_color(severity);
    let severity = severity.as_str().to_uppercase();
    let host = escape_html(host);
    let content = escape_html(content);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>fleetwarden alert</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <div style="background: {color}; color: white; padding: 15px; border-radius: 5px;">
            <h2 style="margin: 0;">{severity} ALERT</h2>
            <p style="margin: 5px 0 0;"><strong>Host:</strong> {host}</p>
        </div>
        <p><strong>Details:</strong><br>{content}</p>
        <p><strong>Time:</strong> {time}</p>
        <hr>
        <p><em>Automated alert from fleetwarden.</em></p>
    </div>
</body>
</html>
"#
    )
}
