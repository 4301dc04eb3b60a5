//! Push-delivery wire format.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One published message. `data` is base64 on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub data: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(alias = "messageId")]
    pub message_id: String,
    #[serde(alias = "publishTime")]
    pub publish_time: DateTime<Utc>,
}

impl PushMessage {
    /// New message with a fresh id, stamped now.
    pub fn new(payload: &[u8], attributes: HashMap<String, String>) -> Self {
        Self {
            data: STANDARD.encode(payload),
            attributes,
            message_id: uuid::Uuid::new_v4().to_string(),
            publish_time: Utc::now(),
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

/// Body POSTed to the push endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    pub subscription: String,
}
