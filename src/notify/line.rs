//! LINE Messaging API push channel.

use async_trait::async_trait;
use serde_json::json;

use super::{AlertMessage, Notifier, NotifyError};
use crate::config::LineConfig;
use crate::models::{ChannelKind, Recipient};

/// Pushes alerts to a LINE user via the Messaging API.
pub struct LineChannel {
    client: reqwest::Client,
    token: String,
    endpoint: String,
}

impl LineChannel {
    pub fn new(config: &LineConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: config.channel_access_token.clone(),
            endpoint: config.endpoint.clone(),
        }
    }
}

#[async_trait]
impl Notifier for LineChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Line
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &AlertMessage,
    ) -> Result<Option<String>, NotifyError> {
        let user_id = recipient
            .line_user_id
            .as_deref()
            .ok_or(NotifyError::NoAddress)?;

        // Push messages carry plain text only; the subject leads the body.
        let text = format!("{}\n\n{}", message.subject, message.body);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({
                "to": user_id,
                "messages": [{ "type": "text", "text": text }],
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Api(e.to_string()))?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-line-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api(format!("status {status}: {detail}")));
        }

        Ok(request_id)
    }
}
