use crate::headers::{self, HeaderMap};
use crate::{DateTime, Duration, Error, Json, Result};
use serde::{Deserialize, Serialize};

/// Wire-level message: headers plus an opaque byte body.
///
/// Immutable once it leaves the pipeline; steps that need to change headers
/// work on a clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Message headers
    pub headers: HeaderMap,
    /// Serialized body
    pub body: Vec<u8>,
}

impl TransportMessage {
    /// Create a new transport message
    pub fn new(headers: HeaderMap, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Add a header, replacing any existing value
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// The `message-id` header, when present
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_ID)
    }

    /// The logical `type` header, when present
    pub fn message_type(&self) -> Option<&str> {
        self.headers.get(headers::TYPE)
    }

    /// The `return-address` header, when present
    pub fn return_address(&self) -> Option<&str> {
        self.headers.get(headers::RETURN_ADDRESS)
    }

    /// The `correlation-id` header, when present
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(headers::CORRELATION_ID)
    }

    /// Whether the `express` flag is set
    pub fn is_express(&self) -> bool {
        self.headers.contains_key(headers::EXPRESS)
    }

    /// Parsed `deferred-until` header, when present
    pub fn deferred_until(&self) -> Result<Option<DateTime>> {
        match self.headers.get(headers::DEFERRED_UNTIL) {
            Some(raw) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(raw).map_err(|e| {
                    Error::header(format!("invalid {} value '{raw}': {e}", headers::DEFERRED_UNTIL))
                })?;
                Ok(Some(parsed.with_timezone(&chrono::Utc)))
            }
            None => Ok(None),
        }
    }

    /// Parsed `sent-time` header, when present
    pub fn sent_time(&self) -> Result<Option<DateTime>> {
        match self.headers.get(headers::SENT_TIME) {
            Some(raw) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(raw).map_err(|e| {
                    Error::header(format!("invalid {} value '{raw}': {e}", headers::SENT_TIME))
                })?;
                Ok(Some(parsed.with_timezone(&chrono::Utc)))
            }
            None => Ok(None),
        }
    }

    /// Parsed `time-to-be-received` header, when present
    pub fn time_to_be_received(&self) -> Result<Option<Duration>> {
        match self.headers.get(headers::TIME_TO_BE_RECEIVED) {
            Some(raw) => parse_duration(raw).map(Some),
            None => Ok(None),
        }
    }

    /// Parsed `priority` header, when present. Higher values dequeue first
    /// on transports that honor the hint.
    pub fn priority(&self) -> Result<Option<i64>> {
        match self.headers.get(headers::PRIORITY) {
            Some(raw) => {
                let parsed = raw.parse::<i64>().map_err(|e| {
                    Error::header(format!("invalid {} value '{raw}': {e}", headers::PRIORITY))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Whether the message has outlived its `time-to-be-received` at `now`.
    ///
    /// A message without both `sent-time` and `time-to-be-received` never
    /// expires. Unparseable values count as expired so a malformed message
    /// does not circulate forever.
    pub fn is_expired(&self, now: DateTime) -> bool {
        let ttl = match self.time_to_be_received() {
            Ok(Some(ttl)) => ttl,
            Ok(None) => return false,
            Err(_) => return true,
        };
        match self.sent_time() {
            Ok(Some(sent)) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => sent + ttl < now,
                Err(_) => true,
            },
            Ok(None) => false,
            Err(_) => true,
        }
    }
}

/// Decoded message: the logical type name, headers, and a structured body.
///
/// Produced by the serializer step early in the receive pipeline and
/// collapsed back to a [`TransportMessage`] in the send pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMessage {
    /// Logical type name of the body
    pub message_type: String,
    /// Message headers
    pub headers: HeaderMap,
    /// Decoded body
    pub body: Json,
}

impl LogicalMessage {
    /// Create a new logical message
    pub fn new(message_type: impl Into<String>, body: Json) -> Self {
        Self {
            message_type: message_type.into(),
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Add a header, replacing any existing value
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }
}

/// Parse a duration string of the form `"500ms"`, `"30s"`, `"5m"`, or `"2h"`
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::header(format!("duration '{raw}' is missing a unit")))?;
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|e| Error::header(format!("invalid duration '{raw}': {e}")))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(Error::header(format!(
            "unknown duration unit '{other}' in '{raw}'"
        ))),
    }
}
