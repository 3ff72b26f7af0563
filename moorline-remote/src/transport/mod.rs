//! Transport seam between the driver and the network.
//!
//! A [`Transport`] opens one duplex connection per call and hands back its
//! two halves separately: a [`BatchSink`] owned by the writer path and an
//! [`AckSource`] owned by the response monitor. The halves never share
//! state, so the monitor can block on reads while a write is in flight.
//!
//! # Implementations
//!
//! - [`TcpTransport`]: framed batches over a
//!   [`NetworkProvider`](moorline_core::NetworkProvider) stream
//! - [`MemoryTransport`]: in-process loopback with scriptable failures

use async_trait::async_trait;

use crate::batch::MessageBatch;
use crate::error::{ConnectionLostError, TransportError, TransportWriteError};

/// Framed batches over a network provider stream.
pub mod tcp;

/// In-process transport with scriptable failures.
pub mod memory;

pub use memory::{MemoryTransport, WriteEvent};
pub use tcp::{Insecure, TcpOptions, TcpTransport};

/// Opens duplex connections to remote addresses.
#[async_trait(?Send)]
pub trait Transport: 'static {
    /// Connection options passed through to [`connect`](Self::connect).
    type Options: 'static;
    /// Credentials passed through to [`connect`](Self::connect).
    type Credentials: 'static;
    /// Outbound half.
    type Sink: BatchSink + 'static;
    /// Inbound half.
    type Source: AckSource + 'static;

    /// Open a connection to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the connection cannot be established.
    async fn connect(
        &self,
        address: &str,
        options: &Self::Options,
        credentials: &Self::Credentials,
    ) -> Result<(Self::Sink, Self::Source), TransportError>;
}

/// Outbound half of a connection.
#[async_trait(?Send)]
pub trait BatchSink {
    /// Write one batch. Resolves once the transport accepted all of it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportWriteError`] if the batch was not accepted.
    async fn send(&mut self, batch: &MessageBatch) -> Result<(), TransportWriteError>;

    /// Half-close the outbound direction, flushing what was written.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportWriteError`] if the flush or shutdown failed.
    async fn shutdown(&mut self) -> Result<(), TransportWriteError>;
}

/// What the inbound half observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundSignal {
    /// An acknowledgment marker arrived; the stream is alive.
    Ack,
    /// The remote closed the stream cleanly.
    Closed,
}

/// Inbound half of a connection.
#[async_trait(?Send)]
pub trait AckSource {
    /// Wait for the next inbound signal.
    ///
    /// Must be cancel-safe: the monitor drops this future when asked to stop.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionLostError`] when the stream breaks.
    async fn recv(&mut self) -> Result<InboundSignal, ConnectionLostError>;
}
