use crate::headers;
use crate::message::{LogicalMessage, TransportMessage};
use crate::{Error, Result};
use async_trait::async_trait;

/// Body codec port: collapses a [`LogicalMessage`] to the wire and back
#[async_trait]
pub trait Serializer: Send + Sync {
    /// Serialize a logical message into a transport message
    async fn serialize(&self, message: &LogicalMessage) -> Result<TransportMessage>;

    /// Deserialize a transport message into a logical message
    async fn deserialize(&self, message: &TransportMessage) -> Result<LogicalMessage>;
}

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Default serializer: UTF-8 JSON bodies tagged with the logical type name
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Create a new JSON serializer
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Serializer for JsonSerializer {
    async fn serialize(&self, message: &LogicalMessage) -> Result<TransportMessage> {
        let body = serde_json::to_vec(&message.body)?;
        let mut headers = message.headers.clone();
        headers.insert_if_absent(headers::TYPE, &message.message_type);
        headers.insert(headers::CONTENT_TYPE, JSON_CONTENT_TYPE);
        Ok(TransportMessage::new(headers, body))
    }

    async fn deserialize(&self, message: &TransportMessage) -> Result<LogicalMessage> {
        match message.headers.get(headers::CONTENT_TYPE) {
            Some(content_type) if content_type.starts_with("application/json") => {}
            Some(other) => {
                return Err(Error::header(format!(
                    "cannot deserialize content type '{other}'"
                )));
            }
            None => {
                return Err(Error::header(format!(
                    "message is missing the {} header",
                    headers::CONTENT_TYPE
                )));
            }
        }
        let message_type = message
            .message_type()
            .ok_or_else(|| {
                Error::header(format!("message is missing the {} header", headers::TYPE))
            })?
            .to_string();
        let body = serde_json::from_slice(&message.body)?;
        Ok(LogicalMessage {
            message_type,
            headers: message.headers.clone(),
            body,
        })
    }
}
