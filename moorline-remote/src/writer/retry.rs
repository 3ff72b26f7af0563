//! Buffer of deliveries whose write failed.
//!
//! A failed list is appended behind what is already waiting, so replay
//! preserves the order deliveries were first handed to the writer. The
//! buffer is bounded in deliveries; a list that does not fit is rejected
//! whole rather than split.

use std::collections::VecDeque;

use crate::batch::Delivery;

/// Bounded FIFO of deliveries waiting to be written again.
#[derive(Debug)]
pub struct RetryBuffer<M> {
    deliveries: VecDeque<Delivery<M>>,
    capacity: usize,
}

impl<M> RetryBuffer<M> {
    /// Empty buffer holding at most `capacity` deliveries.
    pub fn new(capacity: usize) -> Self {
        Self {
            deliveries: VecDeque::new(),
            capacity,
        }
    }

    /// Append `deliveries` behind the current contents.
    ///
    /// # Errors
    ///
    /// Hands the list back untouched if it would exceed capacity.
    pub fn push(&mut self, deliveries: Vec<Delivery<M>>) -> Result<(), Vec<Delivery<M>>> {
        if self.deliveries.len() + deliveries.len() > self.capacity {
            return Err(deliveries);
        }
        self.deliveries.extend(deliveries);
        Ok(())
    }

    /// Remove up to `max` deliveries from the front.
    pub fn take_chunk(&mut self, max: usize) -> Vec<Delivery<M>> {
        let n = max.min(self.deliveries.len());
        self.deliveries.drain(..n).collect()
    }

    /// Put a chunk taken with [`take_chunk`](Self::take_chunk) back at the front.
    ///
    /// Never rejected: the chunk came out of this buffer.
    pub fn restore_front(&mut self, chunk: Vec<Delivery<M>>) {
        for delivery in chunk.into_iter().rev() {
            self.deliveries.push_front(delivery);
        }
    }

    /// Remove everything, oldest first.
    pub fn drain(&mut self) -> Vec<Delivery<M>> {
        self.deliveries.drain(..).collect()
    }

    /// Waiting deliveries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Delivery<M>> {
        self.deliveries.iter()
    }

    /// Number of waiting deliveries.
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Maximum deliveries held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
