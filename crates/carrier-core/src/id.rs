use serde::{Deserialize, Serialize};
use std::fmt;

/// Message identifier as carried in the `message-id` header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message id from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of the id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<uuid::Uuid> for MessageId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// Generate a fresh message id
pub fn generate_message_id() -> MessageId {
    MessageId(uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_id_creation() {
        let fixture = "m-123";
        let actual = MessageId::new(fixture);
        let expected = MessageId("m-123".to_string());
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_message_id_display() {
        let fixture = MessageId::new("m-1");
        let actual = format!("{fixture}");
        let expected = "m-1";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_generate_message_id_is_uuid() {
        let actual = generate_message_id();
        assert!(uuid::Uuid::parse_str(actual.as_str()).is_ok());
    }

    #[test]
    fn test_generate_message_id_is_unique() {
        let first = generate_message_id();
        let second = generate_message_id();
        assert!(first != second);
    }

    #[test]
    fn test_message_id_serialization() {
        let fixture = MessageId::new("m-1");
        let actual = serde_json::to_string(&fixture).unwrap();
        let expected = "\"m-1\"";
        assert_eq!(actual, expected);
    }
}
