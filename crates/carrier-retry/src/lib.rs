//! # carrier-retry
//!
//! Automatic retries and dead-lettering for the Carrier service bus.
//!
//! The error tracker counts delivery failures per message id in memory; the
//! retry step sits first in the incoming pipeline, records downstream
//! failures, lets the transport redeliver until the poison threshold is
//! reached, and then moves the message to the error queue with an
//! `error-details` header.

pub mod step;
pub mod tracker;

pub use step::RetryStep;
pub use tracker::{ErrorTracker, ErrorTrackerConfig, TrackerStats};
