//! # carrier-pubsub
//!
//! Topic-based publish/subscribe for the Carrier service bus.
//!
//! Topics are derived from logical message type names. Subscriptions map a
//! topic to subscriber queue addresses and live in pluggable storage:
//! either centralized (shared, mutated directly by subscribers) or local
//! (owned by the publisher, mutated through subscribe/unsubscribe wire
//! commands).

pub mod memory;
pub mod requests;
pub mod topic;
pub mod traits;

pub use memory::InMemorySubscriptionStorage;
pub use requests::{SubscribeRequest, UnsubscribeRequest, SUBSCRIBE_REQUEST_TYPE, UNSUBSCRIBE_REQUEST_TYPE};
pub use topic::topic_for_type;
pub use traits::SubscriptionStorage;
