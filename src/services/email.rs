use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

use crate::config::SmtpConfig;
use crate::error::TransportError;

/// Outbound email capability. The engine only ever talks to this trait;
/// the SMTP implementation below is selected at startup.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    pub fn new(smtp_config: &SmtpConfig) -> Result<Self, TransportError> {
        let creds = Credentials::new(
            smtp_config.username.clone(),
            smtp_config.password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(smtp_config.timeout_secs)))
            .build();

        Ok(SmtpMailer {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| TransportError::Transport(format!("bad from address: {}", e)))?;

        let to_mailbox = to
            .parse::<Mailbox>()
            .map_err(|e| TransportError::InvalidRecipient(format!("{}: {}", to, e)))?;

        let message = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| TransportError::Transport(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("email sent to {}", to);
                Ok(())
            }
            Err(e) => {
                error!("failed to send email to {}: {}", to, e);
                if e.is_permanent() {
                    // 5xx from the relay: retrying the same recipient will
                    // not help.
                    Err(TransportError::InvalidRecipient(format!("{}: {}", to, e)))
                } else {
                    Err(TransportError::Transport(e.to_string()))
                }
            }
        }
    }
}
