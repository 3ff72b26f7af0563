//! Message serialization consumed by the batch encoder.
//!
//! The encoder needs two things per delivery: a logical type name to intern
//! and the payload bytes. Both are keyed by the delivery's serializer id, so
//! one process can mix formats on the same link.
//!
//! ```rust
//! use moorline_remote::{
//!     JsonSerializer, RemoteMessage, Serialization, SerializerRegistry, JSON_SERIALIZER_ID,
//! };
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Ping {
//!     seq: u64,
//! }
//!
//! impl RemoteMessage for Ping {
//!     fn type_name(&self) -> &str {
//!         "demo.Ping"
//!     }
//! }
//!
//! let registry =
//!     SerializerRegistry::<Ping>::new().with(JSON_SERIALIZER_ID, JsonSerializer::new());
//! let ping = Ping { seq: 7 };
//! assert_eq!(registry.type_name(&ping, JSON_SERIALIZER_ID).expect("name"), "demo.Ping");
//! assert_eq!(registry.serialize(&ping, JSON_SERIALIZER_ID).expect("bytes"), br#"{"seq":7}"#);
//! ```

use std::collections::HashMap;

use moorline_core::{JsonCodec, MessageCodec};
use serde::Serialize;

use crate::error::EncodingError;

/// Serializer id of the bundled JSON format.
pub const JSON_SERIALIZER_ID: u32 = 0;

/// The serialization capability the batch encoder calls into.
pub trait Serialization: 'static {
    /// Message type carried by deliveries.
    type Message: 'static;

    /// Logical type name of `message` under `serializer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] when the id is unknown or the name cannot
    /// be produced.
    fn type_name(
        &self,
        message: &Self::Message,
        serializer_id: u32,
    ) -> Result<String, EncodingError>;

    /// Payload bytes of `message` under `serializer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] when the id is unknown or serialization fails.
    fn serialize(
        &self,
        message: &Self::Message,
        serializer_id: u32,
    ) -> Result<Vec<u8>, EncodingError>;
}

/// A message that knows its own wire type name.
pub trait RemoteMessage {
    /// Name the receiving side uses to pick a deserializer.
    fn type_name(&self) -> &str;
}

/// One serialization format.
pub trait Serializer<M> {
    /// Logical type name of `message` in this format.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] if the message cannot be named.
    fn type_name(&self, message: &M) -> Result<String, EncodingError>;

    /// Encode `message` in this format.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Serialize`] on failure.
    fn serialize(&self, message: &M) -> Result<Vec<u8>, EncodingError>;
}

/// [`Serializer`] for any `Serialize + RemoteMessage` through a [`MessageCodec`].
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer<C: MessageCodec = JsonCodec> {
    codec: C,
}

impl JsonSerializer {
    /// Serializer over [`JsonCodec`].
    pub fn new() -> Self {
        Self { codec: JsonCodec }
    }
}

impl<C: MessageCodec> JsonSerializer<C> {
    /// Wrap a codec.
    pub fn with_codec(codec: C) -> Self {
        Self { codec }
    }
}

impl<M, C> Serializer<M> for JsonSerializer<C>
where
    M: Serialize + RemoteMessage,
    C: MessageCodec,
{
    fn type_name(&self, message: &M) -> Result<String, EncodingError> {
        Ok(message.type_name().to_string())
    }

    fn serialize(&self, message: &M) -> Result<Vec<u8>, EncodingError> {
        self.codec
            .encode(message)
            .map_err(|e| EncodingError::from_codec(message.type_name(), e))
    }
}

/// Serializers indexed by id.
pub struct SerializerRegistry<M> {
    serializers: HashMap<u32, Box<dyn Serializer<M>>>,
}

impl<M> Default for SerializerRegistry<M> {
    fn default() -> Self {
        Self {
            serializers: HashMap::new(),
        }
    }
}

impl<M> SerializerRegistry<M> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `serializer` under `id`, replacing any previous one.
    pub fn register(&mut self, id: u32, serializer: impl Serializer<M> + 'static) {
        if self.serializers.insert(id, Box::new(serializer)).is_some() {
            tracing::debug!("replaced serializer registered under id {}", id);
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, id: u32, serializer: impl Serializer<M> + 'static) -> Self {
        self.register(id, serializer);
        self
    }

    /// Whether `id` has a serializer.
    pub fn contains(&self, id: u32) -> bool {
        self.serializers.contains_key(&id)
    }

    fn lookup(&self, serializer_id: u32) -> Result<&dyn Serializer<M>, EncodingError> {
        self.serializers
            .get(&serializer_id)
            .map(|s| s.as_ref())
            .ok_or(EncodingError::UnknownSerializer { serializer_id })
    }
}

impl<M: Serialize + RemoteMessage + 'static> SerializerRegistry<M> {
    /// Registry with [`JsonSerializer`] under [`JSON_SERIALIZER_ID`].
    pub fn json() -> Self {
        Self::new().with(JSON_SERIALIZER_ID, JsonSerializer::new())
    }
}

impl<M: 'static> Serialization for SerializerRegistry<M> {
    type Message = M;

    fn type_name(&self, message: &M, serializer_id: u32) -> Result<String, EncodingError> {
        self.lookup(serializer_id)?.type_name(message)
    }

    fn serialize(&self, message: &M, serializer_id: u32) -> Result<Vec<u8>, EncodingError> {
        self.lookup(serializer_id)?.serialize(message)
    }
}
