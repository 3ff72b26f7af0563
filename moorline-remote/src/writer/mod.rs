//! The endpoint writer: one per remote address.
//!
//! # Lifecycle
//!
//! ```text
//! ┌─────────────┐  Start   ┌───────────┐  Stop/Restart  ┌─────────────┐
//! │Uninitialized├─────────►│ Connected ├───────────────►│ Terminating │
//! └─────────────┘          └─────▲─────┘                └──────┬──────┘
//!                                │            Start            │
//!                                └─────────────────────────────┘
//! ```
//!
//! A failed write keeps its deliveries in the [`RetryBuffer`] and asks for a
//! restart; the next successful `Start` writes them before anything new.

/// The state machine itself
pub mod core;

/// Batching and buffering limits
pub mod config;

/// Buffer of deliveries awaiting a retry
pub mod retry;

/// Counters
pub mod metrics;

/// Task wrapper giving each writer a sequential mailbox
pub mod mailbox;

pub use config::WriterConfig;
pub use self::core::{DeliveryOutcome, EndpointWriter, WriterCommand, WriterState};
pub use mailbox::{spawn_endpoint_writer, EndpointWriterRef, WriterFailure};
pub use metrics::WriterMetrics;
pub use retry::RetryBuffer;
