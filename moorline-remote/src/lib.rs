//! # moorline-remote
//!
//! Outbound link driver for remote actor messaging.
//!
//! This crate provides:
//! - **EndpointWriter**: one state machine per remote address turning
//!   deliveries into batches and writing them over a persistent connection
//! - **Batch encoding**: per-batch interning of target and type names
//! - **Response monitoring**: detection and announcement of lost connections
//! - **Transports**: length-prefixed CRC32C frames over TCP, plus an
//!   in-memory transport for tests
//!
//! The writer never retries or reconnects on its own. Write failures come
//! back as errors with the deliveries kept for the next `Start`; lost
//! connections are published as [`EndpointTerminatedEvent`]s.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use moorline_core::{
    CodecError, JsonCodec, MessageCodec, NetworkProvider, TaskProvider, TcpListenerTrait,
    TokioNetworkProvider, TokioTaskProvider,
};

// =============================================================================
// Modules
// =============================================================================

/// Actor addresses.
pub mod address;

/// Deliveries, envelopes and the batch encoder.
pub mod batch;

/// Error types.
pub mod error;

/// Endpoint lifecycle events and their publication.
pub mod events;

/// Inbound-half watcher for one connection.
pub mod monitor;

/// Message serialization by serializer id.
pub mod serialization;

/// Connection ownership for one address.
pub mod stream;

/// Transport seam and implementations.
pub mod transport;

/// Frame format with CRC32C checksums.
pub mod wire;

/// The endpoint writer and its mailbox.
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use address::ActorAddress;
pub use batch::{BatchEncoder, Delivery, MessageBatch, MessageEnvelope, ScreenedBatch};
pub use error::{
    ConnectionLostError, EncodingError, TransportError, TransportWriteError, WriterError,
};
pub use events::{EndpointTerminatedEvent, EventNotifier, EventStream, SubscriptionId};
pub use monitor::{MonitorHandle, ResponseMonitor};
pub use serialization::{
    JSON_SERIALIZER_ID, JsonSerializer, RemoteMessage, Serialization, Serializer,
    SerializerRegistry,
};
pub use stream::{ConnectionHandle, StreamManager};
pub use transport::{
    AckSource, BatchSink, InboundSignal, Insecure, MemoryTransport, TcpOptions, TcpTransport,
    Transport, WriteEvent,
};
pub use wire::{
    HEADER_SIZE, MAX_ENCODABLE_PAYLOAD, MAX_FRAME_SIZE, WireError, ack_frame, decode_frame,
    encode_frame, try_decode_frame,
};
pub use writer::{
    DeliveryOutcome, EndpointWriter, EndpointWriterRef, RetryBuffer, WriterCommand, WriterConfig,
    WriterFailure, WriterMetrics, WriterState, spawn_endpoint_writer,
};
