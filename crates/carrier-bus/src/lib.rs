//! # carrier-bus
//!
//! The public surface of the Carrier service bus.
//!
//! This crate assembles the pieces the other `carrier-*` crates provide:
//! the router, the ancestor-aware dispatcher, the built-in pipeline steps,
//! the bus facade with its send/publish/reply/defer/subscribe operations,
//! and the builder that wires everything together and enforces construction
//! order.
//!
//! ## Usage
//!
//! ```no_run
//! use carrier_bus::BusBuilder;
//! use carrier_transport::InMemoryNetwork;
//! use std::sync::Arc;
//!
//! # async fn example() -> carrier_core::Result<()> {
//! let network = InMemoryNetwork::new();
//! let bus = BusBuilder::new("orders")
//!     .transport(Arc::new(network.create_transport("orders")))
//!     .route("billing.Invoice", "billing")
//!     .build()?;
//! bus.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod router;
pub mod steps;

pub use bus::Bus;
pub use config::{BusBuilder, BusConfig};
pub use dispatch::{Dispatcher, HandlerRegistry};
pub use router::Router;
