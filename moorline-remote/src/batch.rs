//! Batch construction with per-batch string interning.
//!
//! A [`MessageBatch`] carries two name tables and a list of envelopes that
//! point into them by index:
//!
//! ```text
//! target_names: ["$1", "$7"]            type_names: ["demo.Ping", "demo.Pong"]
//! envelopes:    [(target 0, type 0), (target 1, type 0), (target 0, type 1)]
//! ```
//!
//! Tables are rebuilt for every batch. Nothing is remembered between calls,
//! so name strings repeat across batches but memory stays bounded.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::address::ActorAddress;
use crate::error::EncodingError;
use crate::serialization::Serialization;

/// One request to send `message` to a remote actor.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<M> {
    /// Remote recipient.
    pub target: ActorAddress,
    /// Optional reply-to address.
    pub sender: Option<ActorAddress>,
    /// Message to serialize.
    pub message: M,
    /// Serializer to encode `message` with.
    pub serializer_id: u32,
}

impl<M> Delivery<M> {
    /// Delivery without a sender.
    pub fn new(target: ActorAddress, message: M, serializer_id: u32) -> Self {
        Self {
            target,
            sender: None,
            message,
            serializer_id,
        }
    }

    /// Attach a sender.
    pub fn with_sender(mut self, sender: ActorAddress) -> Self {
        self.sender = Some(sender);
        self
    }
}

/// A serialized delivery inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Index into [`MessageBatch::target_names`].
    pub target_index: u32,
    /// Index into [`MessageBatch::type_names`].
    pub type_index: u32,
    /// Serializer the payload was produced with.
    pub serializer_id: u32,
    /// Optional reply-to address.
    pub sender: Option<ActorAddress>,
    /// Serialized message.
    pub payload: Vec<u8>,
}

/// The unit of transmission: interned name tables plus envelopes.
///
/// Written whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageBatch {
    /// Distinct target ids in first-seen order.
    pub target_names: Vec<String>,
    /// Type names of distinct (type name, serializer id) keys in first-seen order.
    pub type_names: Vec<String>,
    /// One envelope per delivery, in delivery order.
    pub envelopes: Vec<MessageEnvelope>,
}

impl MessageBatch {
    /// Number of envelopes.
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Whether the batch has no envelopes.
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Target id of the envelope at `index`.
    pub fn target_of(&self, index: usize) -> Option<&str> {
        let envelope = self.envelopes.get(index)?;
        self.target_names
            .get(envelope.target_index as usize)
            .map(String::as_str)
    }

    /// Type name of the envelope at `index`.
    pub fn type_of(&self, index: usize) -> Option<&str> {
        let envelope = self.envelopes.get(index)?;
        self.type_names
            .get(envelope.type_index as usize)
            .map(String::as_str)
    }
}

/// Assigns dense indices to keys in first-seen order.
struct Interner<K> {
    indices: HashMap<K, u32>,
}

impl<K: Hash + Eq> Interner<K> {
    fn new() -> Self {
        Self {
            indices: HashMap::new(),
        }
    }

    /// Index of `key`, plus whether it was new.
    fn intern(&mut self, key: K) -> (u32, bool) {
        let next = self.indices.len() as u32;
        let mut inserted = false;
        let index = *self.indices.entry(key).or_insert_with(|| {
            inserted = true;
            next
        });
        (index, inserted)
    }
}

/// Accumulates envelopes and their name tables for one batch.
struct BatchBuilder {
    targets: Interner<String>,
    types: Interner<(String, u32)>,
    batch: MessageBatch,
}

impl BatchBuilder {
    fn with_capacity(envelopes: usize) -> Self {
        Self {
            targets: Interner::new(),
            types: Interner::new(),
            batch: MessageBatch {
                target_names: Vec::new(),
                type_names: Vec::new(),
                envelopes: Vec::with_capacity(envelopes),
            },
        }
    }

    fn push<M>(&mut self, delivery: &Delivery<M>, type_name: String, payload: Vec<u8>) {
        let (target_index, new_target) = self.targets.intern(delivery.target.id.clone());
        if new_target {
            self.batch.target_names.push(delivery.target.id.clone());
        }

        let (type_index, new_type) = self.types.intern((type_name.clone(), delivery.serializer_id));
        if new_type {
            self.batch.type_names.push(type_name);
        }

        self.batch.envelopes.push(MessageEnvelope {
            target_index,
            type_index,
            serializer_id: delivery.serializer_id,
            sender: delivery.sender.clone(),
            payload,
        });
    }
}

fn encode_one<S: Serialization>(
    serialization: &S,
    delivery: &Delivery<S::Message>,
) -> Result<(String, Vec<u8>), EncodingError> {
    let type_name = serialization.type_name(&delivery.message, delivery.serializer_id)?;
    let payload = serialization.serialize(&delivery.message, delivery.serializer_id)?;
    Ok((type_name, payload))
}

/// Result of [`BatchEncoder::encode_valid`].
#[derive(Debug)]
pub struct ScreenedBatch<M> {
    /// Batch built from every delivery that encoded.
    pub batch: MessageBatch,
    /// Those deliveries, in batch order.
    pub encoded: Vec<Delivery<M>>,
    /// One error per delivery left out, in delivery order.
    pub rejected: Vec<EncodingError>,
}

/// Stateless batch builder.
pub struct BatchEncoder;

impl BatchEncoder {
    /// Encode `deliveries` in order into one [`MessageBatch`].
    ///
    /// # Errors
    ///
    /// The first [`EncodingError`] from `serialization` aborts the batch.
    pub fn encode<S: Serialization>(
        serialization: &S,
        deliveries: &[Delivery<S::Message>],
    ) -> Result<MessageBatch, EncodingError> {
        let mut builder = BatchBuilder::with_capacity(deliveries.len());
        for delivery in deliveries {
            let (type_name, payload) = encode_one(serialization, delivery)?;
            builder.push(delivery, type_name, payload);
        }
        Ok(builder.batch)
    }

    /// Encode `deliveries` in order, leaving out the ones that fail.
    ///
    /// Used where deliveries from unrelated senders share a batch, so one bad
    /// message cannot take the others down with it. Left-out deliveries do
    /// not touch the name tables.
    pub fn encode_valid<S: Serialization>(
        serialization: &S,
        deliveries: Vec<Delivery<S::Message>>,
    ) -> ScreenedBatch<S::Message> {
        let mut builder = BatchBuilder::with_capacity(deliveries.len());
        let mut encoded = Vec::with_capacity(deliveries.len());
        let mut rejected = Vec::new();

        for delivery in deliveries {
            match encode_one(serialization, &delivery) {
                Ok((type_name, payload)) => {
                    builder.push(&delivery, type_name, payload);
                    encoded.push(delivery);
                }
                Err(e) => rejected.push(e),
            }
        }

        ScreenedBatch {
            batch: builder.batch,
            encoded,
            rejected,
        }
    }
}
