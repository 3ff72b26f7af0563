//! Counters for one endpoint writer.

use std::time::Instant;

/// Metrics for an endpoint writer.
#[derive(Debug, Clone)]
pub struct WriterMetrics {
    /// Total number of connect attempts
    pub connect_attempts: u64,

    /// Total number of connections established
    pub connections_established: u64,

    /// Total number of failed connect attempts
    pub connect_failures: u64,

    /// Total number of batches written
    pub batches_sent: u64,

    /// Total number of deliveries written
    pub deliveries_sent: u64,

    /// Total number of batch writes that failed
    pub write_failures: u64,

    /// Total number of deliveries placed in the retry buffer
    pub deliveries_buffered: u64,

    /// Total number of deliveries rejected by a full retry buffer
    pub deliveries_rejected: u64,

    /// Total number of deliveries dropped after an encoding failure
    pub deliveries_dropped: u64,

    /// Total number of encoding failures
    pub encoding_failures: u64,

    /// Total number of retry batches written successfully
    pub retry_flushes: u64,

    /// Time of last successful connect
    pub last_connected: Option<Instant>,

    /// Time of last connect or write failure
    pub last_failure: Option<Instant>,
}

impl Default for WriterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            connect_attempts: 0,
            connections_established: 0,
            connect_failures: 0,
            batches_sent: 0,
            deliveries_sent: 0,
            write_failures: 0,
            deliveries_buffered: 0,
            deliveries_rejected: 0,
            deliveries_dropped: 0,
            encoding_failures: 0,
            retry_flushes: 0,
            last_connected: None,
            last_failure: None,
        }
    }

    /// Record a connect attempt.
    pub fn record_connect_attempt(&mut self) {
        self.connect_attempts += 1;
    }

    /// Record a successful connect.
    pub fn record_connect_success(&mut self) {
        self.connections_established += 1;
        self.last_connected = Some(Instant::now());
    }

    /// Record a failed connect.
    pub fn record_connect_failure(&mut self) {
        self.connect_failures += 1;
        self.last_failure = Some(Instant::now());
    }

    /// Record a batch written.
    pub fn record_batch_sent(&mut self, deliveries: usize) {
        self.batches_sent += 1;
        self.deliveries_sent += deliveries as u64;
    }

    /// Record a failed batch write.
    pub fn record_write_failure(&mut self) {
        self.write_failures += 1;
        self.last_failure = Some(Instant::now());
    }

    /// Record deliveries placed in the retry buffer.
    pub fn record_buffered(&mut self, deliveries: usize) {
        self.deliveries_buffered += deliveries as u64;
    }

    /// Record deliveries a full retry buffer refused.
    pub fn record_rejected(&mut self, deliveries: usize) {
        self.deliveries_rejected += deliveries as u64;
    }

    /// Record an encoding failure. `dropped` deliveries are lost with it.
    pub fn record_encoding_failure(&mut self, dropped: usize) {
        self.encoding_failures += 1;
        self.deliveries_dropped += dropped as u64;
    }

    /// Record a retry batch written.
    pub fn record_retry_flush(&mut self) {
        self.retry_flushes += 1;
    }
}
