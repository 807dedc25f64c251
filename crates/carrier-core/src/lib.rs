//! # carrier-core
//!
//! Foundational types for the Carrier service bus. This crate defines the
//! abstractions every other Carrier crate builds upon.
//!
//! ## Key Components
//!
//! - **Headers**: the canonical wire header registry and an insertion-ordered
//!   header map
//! - **Messages**: `TransportMessage` (wire level) and `LogicalMessage`
//!   (decoded domain payload)
//! - **Transaction context**: the per-message unit of work with ordered
//!   commit/completed/aborted/disposed callbacks
//! - **Serializer**: the body codec port plus the default JSON implementation
//! - **Handlers**: the message-handler port and the bus handle available to
//!   handlers while a message is being processed

pub mod context;
pub mod error;
pub mod handler;
pub mod headers;
pub mod id;
pub mod message;
pub mod serializer;

// Re-export commonly used types
pub use context::{ContextState, TransactionContext};
pub use error::{Error, Result};
pub use handler::{BusHandle, HandlerContext, MessageHandler};
pub use headers::HeaderMap;
pub use id::{MessageId, generate_message_id};
pub use message::{LogicalMessage, TransportMessage};
pub use serializer::{JsonSerializer, Serializer};

/// Common type aliases for convenience
pub type DateTime = chrono::DateTime<chrono::Utc>;
pub type Duration = std::time::Duration;
pub type Json = serde_json::Value;
