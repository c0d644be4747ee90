//! Notification transports. Each channel fails independently; the
//! dispatcher decides what a partial failure means for the alert.

use async_trait::async_trait;
use serde_json::json;

use crate::config::ChannelConfig;
use crate::subscriptions::Contact;

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("channel is not configured")]
    NotConfigured,

    #[error("recipient has no {0} destination on file")]
    NoDestination(&'static str),

    #[error("send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this process has the credentials to use the transport at all.
    fn is_configured(&self) -> bool;

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError>;
}

/// Telegram Bot API transport.
pub struct TelegramChannel {
    http: reqwest::Client,
    bot_token: Option<String>,
}

impl TelegramChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: config.telegram_bot_token.clone(),
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError> {
        let token = self.bot_token.as_ref().ok_or(ChannelError::NotConfigured)?;
        let chat_id = contact
            .telegram_chat_id
            .as_ref()
            .ok_or(ChannelError::NoDestination("telegram"))?;

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": message }))
            .send()
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Send(format!(
                "telegram API returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// HTTP email relay transport (a hosted mail API, not raw SMTP).
pub struct EmailChannel {
    http: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    from: String,
}

impl EmailChannel {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        self.api_url.is_some() && self.api_key.is_some()
    }

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError> {
        let (url, key) = match (self.api_url.as_ref(), self.api_key.as_ref()) {
            (Some(url), Some(key)) => (url, key),
            _ => return Err(ChannelError::NotConfigured),
        };
        let to = contact
            .email
            .as_ref()
            .ok_or(ChannelError::NoDestination("email"))?;

        let response = self
            .http
            .post(url)
            .bearer_auth(key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": "Accumulation alert",
                "text": message,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Send(format!(
                "email relay returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
