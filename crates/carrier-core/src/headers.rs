//! Canonical wire headers and the insertion-ordered header map.
//!
//! Header names are the stable contract between endpoints: each transport
//! maps this registry onto its own envelope. Keys are case-sensitive and the
//! map preserves insertion order.

use serde::{Deserialize, Serialize};

/// Unique identifier of the message
pub const MESSAGE_ID: &str = "message-id";
/// Identifier of the conversation this message belongs to
pub const CORRELATION_ID: &str = "correlation-id";
/// Position of this message within its conversation
pub const CORRELATION_SEQUENCE: &str = "correlation-sequence";
/// Queue address replies should be sent to
pub const RETURN_ADDRESS: &str = "return-address";
/// Queue the message was received from before being forwarded
pub const SOURCE_QUEUE: &str = "source-queue";
/// Messaging intent: [`INTENT_P2P`] or [`INTENT_PUB_SUB`]
pub const INTENT: &str = "intent";
/// Time the message was sent, RFC 3339 UTC
pub const SENT_TIME: &str = "sent-time";
/// Logical type name of the message body
pub const TYPE: &str = "type";
/// Content type of the serialized body
pub const CONTENT_TYPE: &str = "content-type";
/// Optional content encoding of the serialized body
pub const CONTENT_ENCODING: &str = "content-encoding";
/// Time before which the message must not be delivered, RFC 3339 UTC
pub const DEFERRED_UNTIL: &str = "deferred-until";
/// Queue address a deferred message should be returned to when due
pub const DEFERRED_RECIPIENT: &str = "deferred-recipient";
/// Duration after which an undelivered message may be discarded
pub const TIME_TO_BE_RECEIVED: &str = "time-to-be-received";
/// Flag requesting immediate, non-durable delivery
pub const EXPRESS: &str = "express";
/// Accumulated failure descriptions attached before dead-lettering
pub const ERROR_DETAILS: &str = "error-details";
/// Optional integer priority; higher values dequeue first on transports
/// that honor the hint
pub const PRIORITY: &str = "priority";

/// Point-to-point intent value
pub const INTENT_P2P: &str = "p2p";
/// Publish/subscribe intent value
pub const INTENT_PUB_SUB: &str = "pub-sub";

/// Insertion-ordered, case-sensitive string map used for message headers.
///
/// Re-inserting an existing key replaces its value in place, keeping the
/// original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Get the value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a key/value pair, replacing any existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Insert a key/value pair only when the key is absent
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.contains_key(&key) {
            self.entries.push((key, value.into()));
        }
    }

    /// Remove a key, returning its value when present
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(position).1)
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}

impl<const N: usize> From<[(&str, &str); N]> for HeaderMap {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
