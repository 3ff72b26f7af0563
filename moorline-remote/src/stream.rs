//! Connection lifecycle for one remote address.
//!
//! [`StreamManager`] opens, writes to, and tears down at most one connection
//! at a time. It never retries on its own: the writer decides what to do
//! with a failed batch.

use crate::batch::MessageBatch;
use crate::error::{TransportError, TransportWriteError};
use crate::monitor::MonitorHandle;
use crate::transport::{BatchSink, Transport};

/// An open connection: the outbound half plus the monitor watching the inbound one.
pub struct ConnectionHandle<S> {
    sink: S,
    monitor: Option<MonitorHandle>,
    generation: u64,
}

impl<S: BatchSink> ConnectionHandle<S> {
    /// Write one batch on this connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportWriteError`] if the transport rejected the batch.
    pub async fn write(&mut self, batch: &MessageBatch) -> Result<(), TransportWriteError> {
        self.sink.send(batch).await
    }

    /// Shut the outbound half down and stop the monitor.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.shutdown().await {
            tracing::warn!("connection {}: shutdown failed: {}", self.generation, e);
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
    }
}

/// Owns the connection to one remote address.
pub struct StreamManager<T: Transport> {
    transport: T,
    address: String,
    options: T::Options,
    credentials: T::Credentials,
    connection: Option<ConnectionHandle<T::Sink>>,
    generation: u64,
}

impl<T: Transport> StreamManager<T> {
    /// Manager for `address` with no connection open yet.
    pub fn new(
        transport: T,
        address: impl Into<String>,
        options: T::Options,
        credentials: T::Credentials,
    ) -> Self {
        Self {
            transport,
            address: address.into(),
            options,
            credentials,
            connection: None,
            generation: 0,
        }
    }

    /// Remote address this manager connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Number of connections opened so far.
    pub fn connection_generation(&self) -> u64 {
        self.generation
    }

    /// Acknowledgments seen on the current connection.
    pub fn acks_received(&self) -> u64 {
        self.connection
            .as_ref()
            .and_then(|c| c.monitor.as_ref())
            .map_or(0, |m| m.acks_received())
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open a new connection and keep its outbound half.
    ///
    /// The inbound half is returned so the caller can hand it to a monitor
    /// and register it with [`bind_monitor`](Self::bind_monitor).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the transport could not connect. No
    /// state changes in that case.
    pub async fn connect(&mut self) -> Result<T::Source, TransportError> {
        let (sink, source) = self
            .transport
            .connect(&self.address, &self.options, &self.credentials)
            .await?;

        self.generation += 1;
        tracing::debug!(
            "stream_manager: connection {} to {} open",
            self.generation,
            self.address
        );
        self.connection = Some(ConnectionHandle {
            sink,
            monitor: None,
            generation: self.generation,
        });
        Ok(source)
    }

    /// Attach the monitor watching the current connection.
    ///
    /// Without an open connection the monitor is stopped right away.
    pub async fn bind_monitor(&mut self, monitor: MonitorHandle) {
        match self.connection.as_mut() {
            Some(connection) => connection.monitor = Some(monitor),
            None => monitor.stop().await,
        }
    }

    /// Write `batch` on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportWriteError::Closed`] without a connection, or
    /// whatever the transport reported.
    pub async fn write(&mut self, batch: &MessageBatch) -> Result<(), TransportWriteError> {
        match self.connection.as_mut() {
            Some(connection) => connection.write(batch).await,
            None => Err(TransportWriteError::Closed),
        }
    }

    /// Close the current connection.
    ///
    /// Returns false when nothing was open, so a second close does nothing.
    pub async fn close(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                tracing::debug!(
                    "stream_manager: closing connection {} to {}",
                    connection.generation,
                    self.address
                );
                connection.close().await;
                true
            }
            None => false,
        }
    }
}
