//! Alert delivery

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use refill_config::{EmailConfig, SmtpAuthMethod};
use refill_remote_api::{Alerter, RemoteError, RemoteResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Sends alerts through an SMTP relay
pub struct SmtpAlerter {
    config: EmailConfig,
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpAlerter {
    pub fn new(config: EmailConfig, call_timeout: Duration) -> RemoteResult<Self> {
        let from = parse_mailbox(&config.from)?;
        let to = config
            .to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<RemoteResult<Vec<_>>>()?;

        let smtp = &config.smtp;
        let builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        }
        .map_err(|e| RemoteError::Internal(format!("SMTP relay {}: {}", smtp.host, e)))?;

        let mut builder = builder.port(smtp.port).timeout(Some(call_timeout));
        if let Some(user) = &smtp.user {
            let password = smtp
                .password
                .as_ref()
                .map(|p| p.expose().to_string())
                .unwrap_or_default();
            let mechanism = match smtp.auth_method {
                SmtpAuthMethod::Plain => Mechanism::Plain,
                SmtpAuthMethod::Login => Mechanism::Login,
            };
            builder = builder
                .credentials(Credentials::new(user.clone(), password))
                .authentication(vec![mechanism]);
        }

        Ok(Self {
            transport: builder.build(),
            config,
            from,
            to,
        })
    }

    /// Compose the message for one alert
    pub fn build_message(&self, subject: &str, body: &str) -> RemoteResult<Message> {
        let mut message = Message::builder()
            .from(self.from.clone())
            .subject(format!("{} - {}", self.config.subject, subject));
        for recipient in &self.to {
            message = message.to(recipient.clone());
        }

        message
            .multipart(MultiPart::alternative_plain_html(
                body.to_string(),
                html_body(body),
            ))
            .map_err(|e| RemoteError::Delivery(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl Alerter for SmtpAlerter {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn notify(&self, subject: &str, body: &str) -> RemoteResult<()> {
        let message = self.build_message(subject, body)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| RemoteError::Delivery(format!("SMTP send failed: {}", e)))?;

        debug!(
            relay = %self.config.smtp.host,
            recipients = self.to.len(),
            "Alert email sent"
        );
        Ok(())
    }
}

/// Alerter used when email is not configured: failures only reach the log
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, subject: &str, body: &str) -> RemoteResult<()> {
        warn!(subject, body, "Alert (email disabled)");
        Ok(())
    }
}

fn parse_mailbox(addr: &str) -> RemoteResult<Mailbox> {
    addr.parse()
        .map_err(|e| RemoteError::Internal(format!("invalid address '{}': {}", addr, e)))
}

/// Plain text as HTML: escaped, one `<br>` per line break
fn html_body(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        "<div style=\"font-family: monospace\">{}</div>",
        escaped.replace('\n', "<br>")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_config() -> EmailConfig {
        let toml = r#"
            config_version = 1

            [dashboard]
            login_url = "https://dash.example.com/login"
            dashboard_url = "https://dash.example.com/dashboard"
            username = "me@example.com"
            password = "hunter2"

            [email]
            from = "Refill Bot <bot@example.com>"
            to = ["me@example.com", "ops@example.com"]
            subject = "Points reset failed"

            [email.smtp]
            host = "smtp.example.com"
            user = "bot@example.com"
            password = "smtp-secret"
        "#;
        refill_config::parse_config(toml).unwrap().email.unwrap()
    }

    #[test]
    fn html_body_escapes_and_breaks_lines() {
        assert_eq!(
            html_body("a < b\nnext & last"),
            "<div style=\"font-family: monospace\">a &lt; b<br>next &amp; last</div>"
        );
    }

    #[tokio::test]
    async fn message_has_subject_and_recipients() {
        let alerter = SmtpAlerter::new(email_config(), Duration::from_secs(5)).unwrap();
        let message = alerter
            .build_message("FetchFailure", "line one\nline two")
            .unwrap();

        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Points reset failed - FetchFailure"));
        assert!(formatted.contains("me@example.com"));
        assert!(formatted.contains("ops@example.com"));
        assert!(formatted.contains("line one<br>line two"));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let mut config = email_config();
        config.to.push("not an address".into());
        assert!(SmtpAlerter::new(config, Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn log_alerter_always_succeeds() {
        assert!(LogAlerter.notify("FetchFailure", "details").await.is_ok());
    }
}
