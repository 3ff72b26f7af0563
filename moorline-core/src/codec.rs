//! Byte formats for batches on the wire.
//!
//! A [`MessageCodec`] turns a whole `MessageBatch` into the payload of one
//! frame. Errors carry the Rust type that failed and the codec's format name,
//! so a rejected batch can be traced back without a debugger.
//!
//! ```rust
//! use moorline_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Hello {
//!     name: String,
//! }
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Hello { name: "a".into() }).expect("encode");
//! assert_eq!(&bytes, br#"{"name":"a"}"#);
//! let back: Hello = codec.decode(&bytes).expect("decode");
//! assert_eq!(back.name, "a");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Failure inside a [`MessageCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be written in the codec's format.
    #[error("{format} cannot encode {type_name}: {source}")]
    Encode {
        /// Format name reported by [`MessageCodec::format`].
        format: &'static str,
        /// Rust type of the rejected value.
        type_name: &'static str,
        /// Underlying serializer error.
        #[source]
        source: Cause,
    },
    /// Bytes could not be read back as the requested type.
    #[error("{format} cannot decode {type_name} from {len} bytes: {source}")]
    Decode {
        /// Format name reported by [`MessageCodec::format`].
        format: &'static str,
        /// Rust type that was requested.
        type_name: &'static str,
        /// Length of the rejected input.
        len: usize,
        /// Underlying deserializer error.
        #[source]
        source: Cause,
    },
}

impl CodecError {
    /// Build a [`CodecError::Encode`] for a value of type `T`.
    pub fn encode<T: ?Sized>(format: &'static str, source: impl Into<Cause>) -> Self {
        CodecError::Encode {
            format,
            type_name: std::any::type_name::<T>(),
            source: source.into(),
        }
    }

    /// Build a [`CodecError::Decode`] for `len` bytes requested as `T`.
    pub fn decode<T: ?Sized>(format: &'static str, len: usize, source: impl Into<Cause>) -> Self {
        CodecError::Decode {
            format,
            type_name: std::any::type_name::<T>(),
            len,
            source: source.into(),
        }
    }

    /// Rust type the failing call was made with.
    pub fn type_name(&self) -> &'static str {
        match self {
            CodecError::Encode { type_name, .. } | CodecError::Decode { type_name, .. } => {
                type_name
            }
        }
    }
}

/// Payload format of a transport.
///
/// Implementations are cloned into every connection a transport opens.
pub trait MessageCodec: Clone + 'static {
    /// Short format name used in errors and logs.
    fn format(&self) -> &'static str;

    /// Write `value` in this format.
    ///
    /// # Errors
    ///
    /// [`CodecError::Encode`] when the value has no representation.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Read a `T` from `bytes`.
    ///
    /// # Errors
    ///
    /// [`CodecError::Decode`] on malformed or mistyped input.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON via `serde_json`, readable in packet captures.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn format(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::encode::<T>(self.format(), e))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CodecError::decode::<T>(self.format(), bytes.len(), e))
    }
}
