use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use crate::config::SmsConfig;
use crate::error::TransportError;

/// Outbound SMS capability.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), TransportError>;
}

/// HTTP gateway client for an SMS provider's message endpoint.
#[derive(Clone)]
pub struct HttpSmsGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_number: String,
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    from: &'a str,
    to: &'a str,
    body: &'a str,
}

impl HttpSmsGateway {
    pub fn new(config: &SmsConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            from_number: config.from_number.clone(),
        })
    }
}

#[async_trait]
impl SmsTransport for HttpSmsGateway {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SmsRequest {
                from: &self.from_number,
                to,
                body,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            info!("sms sent to {}", to);
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        error!("sms provider rejected message to {}: {} {}", to, status, detail);

        match status.as_u16() {
            429 => Err(TransportError::RateLimited),
            400 | 404 | 422 => Err(TransportError::InvalidRecipient(format!(
                "{}: {}",
                to, detail
            ))),
            _ => Err(TransportError::Transport(format!("{} {}", status, detail))),
        }
    }
}
