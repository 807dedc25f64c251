//! Built-in pipeline steps.
//!
//! Default incoming order: retry → deferred-messages → handle-deferred →
//! deserialize → dispatch. Default outgoing order: assign-default-headers →
//! serialize → send. The builder removes both deferral steps for transports
//! with native deferred delivery.

mod deferral;
mod dispatch;
mod headers;
mod send;
mod serialize;

pub use deferral::{DeferredMessagesStep, HandleDeferredStep};
pub use dispatch::DispatchStep;
pub use headers::AssignDefaultHeadersStep;
pub use send::SendStep;
pub use serialize::{DeserializeStep, SerializeStep};
