//! Error types for the outbound link.
//!
//! Each failure domain gets its own type: message encoding, opening the
//! transport, writing to it, and losing its inbound half. [`WriterError`] is
//! what the driver hands to its caller.

use std::time::Duration;

use moorline_core::CodecError;
use thiserror::Error;

use crate::wire::WireError;
use crate::writer::WriterState;

/// A delivery could not be turned into an envelope.
///
/// Aborts the batch being built. Never retried by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// No serializer is registered under the requested id.
    #[error("no serializer registered for id {serializer_id}")]
    UnknownSerializer {
        /// The id carried by the delivery.
        serializer_id: u32,
    },

    /// The serializer could not name the message type.
    #[error("cannot resolve type name under serializer {serializer_id}: {reason}")]
    TypeName {
        /// The id carried by the delivery.
        serializer_id: u32,
        /// Serializer-provided detail.
        reason: String,
    },

    /// The serializer rejected the message.
    #[error("failed to serialize {type_name}: {reason}")]
    Serialize {
        /// Logical type name of the message.
        type_name: String,
        /// Serializer-provided detail.
        reason: String,
    },
}

impl EncodingError {
    pub(crate) fn from_codec(type_name: &str, err: CodecError) -> Self {
        EncodingError::Serialize {
            type_name: type_name.to_string(),
            reason: err.to_string(),
        }
    }
}

/// The transport could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote refused or the network failed while connecting.
    #[error("connection to {address} failed: {reason}")]
    ConnectFailed {
        /// Remote address.
        address: String,
        /// Transport-provided detail.
        reason: String,
    },

    /// The transport-level connect timeout elapsed.
    #[error("connection to {address} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Remote address.
        address: String,
        /// Configured timeout.
        timeout: Duration,
    },
}

/// A batch was not accepted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportWriteError {
    /// The underlying stream reported an I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// The stream was already shut down.
    #[error("stream closed")]
    Closed,

    /// The batch could not be encoded for the wire.
    #[error("batch codec error: {0}")]
    Codec(String),

    /// The encoded batch exceeds the frame limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

impl From<std::io::Error> for TransportWriteError {
    fn from(error: std::io::Error) -> Self {
        TransportWriteError::Io(error.to_string())
    }
}

impl From<CodecError> for TransportWriteError {
    fn from(error: CodecError) -> Self {
        TransportWriteError::Codec(error.to_string())
    }
}

impl From<WireError> for TransportWriteError {
    fn from(error: WireError) -> Self {
        match error {
            WireError::FrameTooLarge { size, max } => {
                TransportWriteError::FrameTooLarge { size, max }
            }
            other => TransportWriteError::Codec(other.to_string()),
        }
    }
}

/// The inbound half ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection lost: {reason}")]
pub struct ConnectionLostError {
    /// Transport-provided detail.
    pub reason: String,
}

impl ConnectionLostError {
    /// Build from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ConnectionLostError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<WireError> for ConnectionLostError {
    fn from(error: WireError) -> Self {
        Self::new(format!("wire error: {}", error))
    }
}

/// Errors returned by [`EndpointWriter`](crate::EndpointWriter) command handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriterError {
    /// Opening the connection failed.
    #[error(transparent)]
    Connect(#[from] TransportError),

    /// A delivery could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The transport rejected a batch. Its deliveries are in the retry buffer.
    #[error(transparent)]
    Write(#[from] TransportWriteError),

    /// The retry buffer could not take a failed delivery list.
    #[error("retry buffer full (capacity {capacity}): rejected {rejected} deliveries")]
    RetryBufferFull {
        /// Configured capacity in deliveries.
        capacity: usize,
        /// Deliveries that were not buffered.
        rejected: usize,
    },

    /// `Deliver` arrived while the writer had no connection.
    #[error("endpoint writer is not connected (state {state:?})")]
    NotConnected {
        /// State at the time of the request.
        state: WriterState,
    },

    /// `Start` arrived while a connection is already open.
    #[error("endpoint writer is already connected")]
    AlreadyConnected,

    /// The mailbox task has exited.
    #[error("endpoint writer mailbox closed")]
    MailboxClosed,
}

impl WriterError {
    /// Whether this failure should be escalated to the supervisor.
    ///
    /// Encoding errors are the caller's problem and state errors are misuse;
    /// everything touching the connection asks for a restart.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            WriterError::Connect(_) | WriterError::Write(_) | WriterError::RetryBufferFull { .. }
        )
    }
}
