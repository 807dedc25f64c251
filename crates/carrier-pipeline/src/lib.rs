//! # carrier-pipeline
//!
//! The staged middleware chain of the Carrier service bus.
//!
//! A pipeline holds two ordered step sequences: incoming steps run on every
//! received message, outgoing steps on every send. Each step decides whether
//! to call `next` (at most once); omitting it short-circuits the chain,
//! which is how poison handling and deferral consume messages. Steps are
//! named, and the pipeline supports positional insertion and removal until
//! the bus starts, after which it is effectively immutable.

pub mod context;
pub mod invoker;
pub mod pipeline;
pub mod step;

pub use context::{IncomingContext, OutgoingContext};
pub use invoker::PipelineInvoker;
pub use pipeline::{Pipeline, StepPosition};
pub use step::{IncomingNext, IncomingStep, OutgoingNext, OutgoingStep};
