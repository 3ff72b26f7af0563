//! Endpoint writer tuning.

/// Configuration for batching and retry buffering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    /// Maximum deliveries encoded into one batch.
    pub batch_size: usize,

    /// Maximum deliveries held for retry after failed writes.
    pub retry_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            retry_capacity: 10_000,
        }
    }
}

impl WriterConfig {
    /// Create a configuration with explicit limits.
    ///
    /// A zero `batch_size` is raised to 1.
    pub fn new(batch_size: usize, retry_capacity: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            retry_capacity,
        }
    }

    /// Replace the batch size. Zero is raised to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Replace the retry buffer capacity.
    pub fn with_retry_capacity(mut self, retry_capacity: usize) -> Self {
        self.retry_capacity = retry_capacity;
        self
    }

    /// Small batches and a short buffer, for links where latency matters more
    /// than throughput.
    pub fn local_network() -> Self {
        Self {
            batch_size: 100,
            retry_capacity: 1_000,
        }
    }

    /// Large batches and a deep buffer to ride out longer outages.
    pub fn wan_network() -> Self {
        Self {
            batch_size: 5_000,
            retry_capacity: 100_000,
        }
    }
}
