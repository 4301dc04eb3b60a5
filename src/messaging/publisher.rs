//! Message publisher.
//!
//! Pushes messages straight to the subscriber's push endpoint. The trace
//! carrier of the publishing context travels in the message attributes.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::PeerConfig;
use crate::messaging::message::{PushEnvelope, PushMessage};
use crate::telemetry::RequestContext;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid push endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("subscriber rejected message with status {0}")]
    Rejected(u16),
}

impl PublishError {
    /// The subscriber could not be reached or refused the message, as
    /// opposed to a local misconfiguration.
    pub fn is_dependency_failure(&self) -> bool {
        !matches!(self, PublishError::Endpoint(_))
    }
}

#[derive(Debug, Clone)]
pub struct Publisher {
    client: reqwest::Client,
    endpoint: Url,
    topic: String,
    subscription: String,
}

impl Publisher {
    pub fn new(config: &PeerConfig) -> Result<Self, PublishError> {
        Self::with_timeout(&config.push_endpoint, &config.topic, &config.subscription, config.timeout())
    }

    pub fn with_timeout(
        endpoint: &str,
        topic: &str,
        subscription: &str,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: Url::parse(endpoint)?,
            topic: topic.to_string(),
            subscription: subscription.to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `payload` on behalf of `ctx`. Returns the message id.
    pub async fn publish(&self, ctx: &RequestContext, payload: &[u8]) -> Result<String, PublishError> {
        let message = PushMessage::new(payload, ctx.outbound_carrier().into_attributes());
        let message_id = message.message_id.clone();
        let envelope = PushEnvelope {
            message,
            subscription: self.subscription.clone(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status.as_u16()));
        }

        tracing::debug!(topic = %self.topic, message_id = %message_id, "Message published");
        Ok(message_id)
    }
}
