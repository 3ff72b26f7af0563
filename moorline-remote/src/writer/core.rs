//! The endpoint writer state machine.

use std::rc::Rc;

use moorline_core::TaskProvider;

use super::config::WriterConfig;
use super::metrics::WriterMetrics;
use super::retry::RetryBuffer;
use crate::batch::{BatchEncoder, Delivery, MessageBatch};
use crate::error::{EncodingError, WriterError};
use crate::events::EventNotifier;
use crate::monitor::ResponseMonitor;
use crate::serialization::Serialization;
use crate::stream::StreamManager;
use crate::transport::Transport;

/// Connection state of an [`EndpointWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Never started.
    Uninitialized,
    /// A connection is open and deliveries are written.
    Connected,
    /// Stopped or restarting; the connection is closed.
    Terminating,
}

/// Commands accepted by [`EndpointWriter::handle`].
#[derive(Debug)]
pub enum WriterCommand<M> {
    /// Open the connection and flush anything buffered.
    Start,
    /// Close the connection.
    Stop,
    /// Close the connection ahead of a new `Start`.
    Restart,
    /// Encode and write these deliveries as one batch.
    Deliver(Vec<Delivery<M>>),
}

/// What happened to a list handed to [`EndpointWriter::deliver_valid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Result for the deliveries that encoded.
    pub result: Result<(), WriterError>,
    /// One error per delivery dropped because it failed to encode.
    pub rejected: Vec<EncodingError>,
}

impl DeliveryOutcome {
    /// Fold into a single result: a connection error wins, otherwise the
    /// first encoding error.
    ///
    /// # Errors
    ///
    /// Returns whichever error the outcome carries.
    pub fn into_result(self) -> Result<(), WriterError> {
        self.result?;
        match self.rejected.into_iter().next() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Drives the link to one remote address.
///
/// Commands are handled one at a time by whoever owns the writer (see
/// [`spawn_endpoint_writer`](super::spawn_endpoint_writer)), so at most one
/// write is ever in flight and batches leave in the order they were handed in.
pub struct EndpointWriter<T, S, P>
where
    T: Transport,
    S: Serialization,
    P: TaskProvider,
{
    stream: StreamManager<T>,
    serialization: S,
    notifier: Rc<dyn EventNotifier>,
    task: P,
    config: WriterConfig,
    state: WriterState,
    retry: RetryBuffer<S::Message>,
    metrics: WriterMetrics,
}

impl<T, S, P> EndpointWriter<T, S, P>
where
    T: Transport,
    S: Serialization,
    P: TaskProvider,
{
    /// Create a writer for the address `stream` connects to.
    ///
    /// `notifier` receives an [`EndpointTerminatedEvent`](crate::EndpointTerminatedEvent)
    /// each time a connection ends.
    pub fn new<N>(
        stream: StreamManager<T>,
        serialization: S,
        notifier: N,
        task: P,
        config: WriterConfig,
    ) -> Self
    where
        N: EventNotifier + 'static,
    {
        let retry = RetryBuffer::new(config.retry_capacity);
        Self {
            stream,
            serialization,
            notifier: Rc::new(notifier),
            task,
            config,
            state: WriterState::Uninitialized,
            retry,
            metrics: WriterMetrics::new(),
        }
    }

    /// Dispatch one command.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start) and [`deliver`](Self::deliver). `Stop` and
    /// `Restart` never fail.
    pub async fn handle(&mut self, command: WriterCommand<S::Message>) -> Result<(), WriterError> {
        match command {
            WriterCommand::Start => self.start().await,
            WriterCommand::Stop => {
                self.stop().await;
                Ok(())
            }
            WriterCommand::Restart => {
                self.restart().await;
                Ok(())
            }
            WriterCommand::Deliver(deliveries) => self.deliver(deliveries).await,
        }
    }

    /// Open the connection, bind a response monitor to it, then flush the
    /// retry buffer ahead of any new delivery.
    ///
    /// # Errors
    ///
    /// - [`WriterError::AlreadyConnected`] if a connection is open
    /// - [`WriterError::Connect`] if the transport could not connect
    /// - [`WriterError::Write`] if flushing the retry buffer failed; the
    ///   writer stays connected and the unsent deliveries stay buffered
    /// - [`WriterError::Encoding`] if a buffered delivery no longer encoded
    ///   and was dropped; everything else was written and the writer is
    ///   connected
    pub async fn start(&mut self) -> Result<(), WriterError> {
        if self.state == WriterState::Connected {
            return Err(WriterError::AlreadyConnected);
        }

        let address = self.stream.address().to_string();
        tracing::debug!("Connecting to address {}", address);
        self.metrics.record_connect_attempt();

        let source = match self.stream.connect().await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Failed to connect to address {}, reason {}", address, e);
                self.metrics.record_connect_failure();
                return Err(e.into());
            }
        };

        let monitor = ResponseMonitor::spawn(
            &self.task,
            address.clone(),
            source,
            self.notifier.clone(),
        );
        self.stream.bind_monitor(monitor).await;
        self.metrics.record_connect_success();
        self.state = WriterState::Connected;
        tracing::debug!("Connected to address {}", address);

        self.flush().await
    }

    /// Close the connection and move to [`WriterState::Terminating`].
    ///
    /// A second call finds nothing to close and does nothing else.
    pub async fn stop(&mut self) {
        tracing::debug!("Stopping endpoint writer for {}", self.stream.address());
        self.close().await;
    }

    /// Close the connection so a following `Start` opens a fresh one.
    ///
    /// Buffered deliveries are kept for that `Start`.
    pub async fn restart(&mut self) {
        tracing::debug!("Restarting endpoint writer for {}", self.stream.address());
        self.close().await;
    }

    async fn close(&mut self) {
        if self.stream.close().await {
            tracing::debug!("Closed connection to address {}", self.stream.address());
        }
        self.state = WriterState::Terminating;
    }

    /// Encode `deliveries` into one batch and write it.
    ///
    /// Anything already in the retry buffer is written first.
    ///
    /// # Errors
    ///
    /// - [`WriterError::Encoding`] if a delivery could not be encoded; nothing
    ///   is written or buffered
    /// - [`WriterError::NotConnected`] without a connection; the deliveries
    ///   are parked in the retry buffer for the next `Start`
    /// - [`WriterError::Write`] if the transport rejected a batch; the
    ///   deliveries are in the retry buffer
    /// - [`WriterError::RetryBufferFull`] if they did not fit there
    pub async fn deliver(
        &mut self,
        deliveries: Vec<Delivery<S::Message>>,
    ) -> Result<(), WriterError> {
        if deliveries.is_empty() {
            return Ok(());
        }

        // Encoded up front even when parking, so the buffer only ever holds
        // deliveries that encode.
        let batch = match BatchEncoder::encode(&self.serialization, &deliveries) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(
                    "Failed to encode batch for address {}, reason {}",
                    self.stream.address(),
                    e
                );
                self.metrics.record_encoding_failure(deliveries.len());
                return Err(e.into());
            }
        };

        self.send_batch(batch, deliveries).await.into_result()
    }

    /// Like [`deliver`](Self::deliver), but a delivery that fails to encode
    /// is left out instead of failing the rest.
    ///
    /// Meant for lists merged from independent senders. Every left-out
    /// delivery is dropped and shows up in [`DeliveryOutcome::rejected`].
    pub async fn deliver_valid(
        &mut self,
        deliveries: Vec<Delivery<S::Message>>,
    ) -> DeliveryOutcome {
        let screened = BatchEncoder::encode_valid(&self.serialization, deliveries);
        for e in &screened.rejected {
            tracing::error!(
                "Dropping delivery to address {}, reason {}",
                self.stream.address(),
                e
            );
            self.metrics.record_encoding_failure(1);
        }

        if screened.encoded.is_empty() {
            return DeliveryOutcome {
                result: Ok(()),
                rejected: screened.rejected,
            };
        }

        let mut outcome = self.send_batch(screened.batch, screened.encoded).await;
        let mut rejected = screened.rejected;
        rejected.append(&mut outcome.rejected);
        outcome.rejected = rejected;
        outcome
    }

    /// Write an encoded batch behind the retry buffer, parking its
    /// deliveries when that is not possible.
    async fn send_batch(
        &mut self,
        batch: MessageBatch,
        deliveries: Vec<Delivery<S::Message>>,
    ) -> DeliveryOutcome {
        if self.state != WriterState::Connected {
            let result = self
                .park(deliveries)
                .and(Err(WriterError::NotConnected { state: self.state }));
            return DeliveryOutcome {
                result,
                rejected: Vec::new(),
            };
        }

        let mut outcome = self.flush_buffer().await;
        if outcome.result.is_err() {
            // Still behind the unflushed deliveries.
            if let Err(e) = self.park(deliveries) {
                outcome.result = Err(e);
            }
            return outcome;
        }

        match self.stream.write(&batch).await {
            Ok(()) => self.metrics.record_batch_sent(deliveries.len()),
            Err(e) => {
                tracing::error!(
                    "Failed to send to address {}, reason {}",
                    self.stream.address(),
                    e
                );
                self.metrics.record_write_failure();
                outcome.result = self.park(deliveries).and(Err(e.into()));
            }
        }
        outcome
    }

    /// Write the retry buffer front-first in batches of `batch_size`.
    ///
    /// A delivery that no longer encodes is dropped; the rest of its chunk
    /// is still written.
    ///
    /// # Errors
    ///
    /// - [`WriterError::NotConnected`] without a connection
    /// - [`WriterError::Write`] on the first rejected chunk, which goes back
    ///   to the front of the buffer
    /// - [`WriterError::Encoding`] for the first dropped delivery, once
    ///   everything else was written
    pub async fn flush(&mut self) -> Result<(), WriterError> {
        self.flush_buffer().await.into_result()
    }

    async fn flush_buffer(&mut self) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome {
            result: Ok(()),
            rejected: Vec::new(),
        };
        if self.retry.is_empty() {
            return outcome;
        }
        if self.state != WriterState::Connected {
            outcome.result = Err(WriterError::NotConnected { state: self.state });
            return outcome;
        }

        tracing::debug!(
            "Flushing {} buffered deliveries to address {}",
            self.retry.len(),
            self.stream.address()
        );

        while !self.retry.is_empty() {
            let chunk = self.retry.take_chunk(self.config.batch_size);
            let screened = BatchEncoder::encode_valid(&self.serialization, chunk);
            for e in screened.rejected {
                tracing::error!(
                    "Dropping buffered delivery to address {}, reason {}",
                    self.stream.address(),
                    e
                );
                self.metrics.record_encoding_failure(1);
                outcome.rejected.push(e);
            }
            if screened.encoded.is_empty() {
                continue;
            }

            match self.stream.write(&screened.batch).await {
                Ok(()) => {
                    self.metrics.record_batch_sent(screened.encoded.len());
                    self.metrics.record_retry_flush();
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to send to address {}, reason {}",
                        self.stream.address(),
                        e
                    );
                    self.metrics.record_write_failure();
                    self.retry.restore_front(screened.encoded);
                    outcome.result = Err(e.into());
                    return outcome;
                }
            }
        }

        outcome
    }

    fn park(&mut self, deliveries: Vec<Delivery<S::Message>>) -> Result<(), WriterError> {
        let count = deliveries.len();
        match self.retry.push(deliveries) {
            Ok(()) => {
                self.metrics.record_buffered(count);
                Ok(())
            }
            Err(rejected) => {
                tracing::error!(
                    "Retry buffer for address {} full, rejecting {} deliveries",
                    self.stream.address(),
                    rejected.len()
                );
                self.metrics.record_rejected(rejected.len());
                Err(WriterError::RetryBufferFull {
                    capacity: self.retry.capacity(),
                    rejected: rejected.len(),
                })
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Remote address this writer is bound to.
    pub fn address(&self) -> &str {
        self.stream.address()
    }

    /// Counters.
    pub fn metrics(&self) -> &WriterMetrics {
        &self.metrics
    }

    /// Configuration in use.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// The stream manager owning the connection.
    pub fn stream(&self) -> &StreamManager<T> {
        &self.stream
    }

    /// Deliveries waiting in the retry buffer.
    pub fn pending_deliveries(&self) -> usize {
        self.retry.len()
    }

    /// The retry buffer, oldest delivery first.
    pub fn retry_buffer(&self) -> &RetryBuffer<S::Message> {
        &self.retry
    }

    /// Take every buffered delivery out, e.g. to dead-letter them after a
    /// final stop.
    pub fn drain_retry_buffer(&mut self) -> Vec<Delivery<S::Message>> {
        self.retry.drain()
    }

    pub(crate) fn task(&self) -> &P {
        &self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ActorAddress;
    use crate::error::TransportWriteError;
    use crate::events::EventStream;
    use crate::serialization::{RemoteMessage, Serializer, SerializerRegistry, JSON_SERIALIZER_ID};
    use std::cell::Cell;
    use crate::transport::MemoryTransport;
    use moorline_core::TokioTaskProvider;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct Note(u32);

    impl RemoteMessage for Note {
        fn type_name(&self) -> &str {
            "test.Note"
        }
    }

    type TestWriter = EndpointWriter<MemoryTransport, SerializerRegistry<Note>, TokioTaskProvider>;

    /// Serializer id whose encoding can be switched off mid-test.
    const FLAKY_SERIALIZER_ID: u32 = 7;

    /// Plain-text format that fails while `broken` is set.
    struct Flaky {
        broken: Rc<Cell<bool>>,
    }

    impl Serializer<Note> for Flaky {
        fn type_name(&self, message: &Note) -> Result<String, EncodingError> {
            Ok(message.type_name().to_string())
        }

        fn serialize(&self, message: &Note) -> Result<Vec<u8>, EncodingError> {
            if self.broken.get() {
                return Err(EncodingError::Serialize {
                    type_name: "test.Note".to_string(),
                    reason: "format disabled".to_string(),
                });
            }
            Ok(message.0.to_string().into_bytes())
        }
    }

    fn writer_with(
        transport: &MemoryTransport,
        registry: SerializerRegistry<Note>,
        config: WriterConfig,
    ) -> (TestWriter, EventStream) {
        let events = EventStream::new();
        let stream = StreamManager::new(transport.clone(), "node-b", (), ());
        let writer =
            EndpointWriter::new(stream, registry, events.clone(), TokioTaskProvider, config);
        (writer, events)
    }

    fn writer(transport: &MemoryTransport, config: WriterConfig) -> (TestWriter, EventStream) {
        writer_with(transport, SerializerRegistry::json(), config)
    }

    fn note(n: u32, serializer_id: u32) -> Delivery<Note> {
        Delivery::new(ActorAddress::new("node-b", "actor"), Note(n), serializer_id)
    }

    fn written_payloads(transport: &MemoryTransport) -> Vec<Vec<Vec<u8>>> {
        transport
            .written()
            .iter()
            .map(|b| b.envelopes.iter().map(|e| e.payload.clone()).collect())
            .collect()
    }

    fn notes(range: std::ops::Range<u32>) -> Vec<Delivery<Note>> {
        range
            .map(|n| note(n, JSON_SERIALIZER_ID))
            .collect()
    }

    fn run_local<F: std::future::Future<Output = ()>>(future: F) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(tokio::task::LocalSet::new().run_until(future));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());

            writer.start().await.expect("start");
            assert_eq!(writer.state(), WriterState::Connected);
            assert_eq!(writer.start().await, Err(WriterError::AlreadyConnected));
            assert_eq!(transport.connections_opened(), 1);
        });
    }

    #[test]
    fn test_write_failure_buffers_deliveries() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());
            writer.start().await.expect("start");

            transport.fail_next_writes(1);
            let err = writer.deliver(notes(0..3)).await.expect_err("write fails");
            assert_eq!(
                err,
                WriterError::Write(TransportWriteError::Io("injected write failure".to_string()))
            );
            assert!(err.requires_restart());
            assert_eq!(writer.pending_deliveries(), 3);
            assert_eq!(writer.metrics().write_failures, 1);
        });
    }

    #[test]
    fn test_flush_splits_into_batches() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::new(2, 100));

            assert_eq!(
                writer.deliver(notes(0..5)).await,
                Err(WriterError::NotConnected {
                    state: WriterState::Uninitialized
                })
            );
            writer.start().await.expect("start");

            let sizes: Vec<usize> = transport.written().iter().map(|b| b.len()).collect();
            assert_eq!(sizes, vec![2, 2, 1]);
            assert_eq!(writer.pending_deliveries(), 0);
            assert_eq!(writer.metrics().retry_flushes, 3);
        });
    }

    #[test]
    fn test_drain_after_final_stop() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());
            writer.start().await.expect("start");

            transport.fail_next_writes(1);
            assert!(writer.deliver(notes(0..2)).await.is_err());
            writer.stop().await;

            let drained = writer.drain_retry_buffer();
            assert_eq!(drained.len(), 2);
            assert_eq!(drained[0].message.0, 0);
            assert_eq!(writer.pending_deliveries(), 0);
        });
    }

    #[test]
    fn test_encoding_error_is_not_buffered() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());
            writer.start().await.expect("start");

            let bad = vec![Delivery::new(ActorAddress::new("node-b", "actor"), Note(1), 42)];
            let err = writer.deliver(bad).await.expect_err("unknown serializer");
            assert!(matches!(err, WriterError::Encoding(_)));
            assert!(!err.requires_restart());
            assert_eq!(writer.pending_deliveries(), 0);
            assert!(transport.written().is_empty());
        });
    }

    #[test]
    fn test_unencodable_deliveries_are_not_parked() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());

            let deliveries = vec![
                note(1, JSON_SERIALIZER_ID),
                note(2, 42),
                note(3, JSON_SERIALIZER_ID),
            ];
            let err = writer.deliver(deliveries).await.expect_err("unknown serializer");
            assert_eq!(
                err,
                WriterError::Encoding(EncodingError::UnknownSerializer { serializer_id: 42 })
            );
            assert_eq!(writer.pending_deliveries(), 0);
            assert_eq!(writer.metrics().deliveries_dropped, 3);

            writer.start().await.expect("start");
            assert!(transport.written().is_empty());
        });
    }

    #[test]
    fn test_flush_drops_only_deliveries_that_stopped_encoding() {
        run_local(async {
            let transport = MemoryTransport::new();
            let broken = Rc::new(Cell::new(false));
            let registry = SerializerRegistry::json().with(
                FLAKY_SERIALIZER_ID,
                Flaky {
                    broken: broken.clone(),
                },
            );
            let (mut writer, _events) = writer_with(&transport, registry, WriterConfig::default());
            writer.start().await.expect("start");

            transport.fail_next_writes(1);
            let deliveries = vec![
                note(1, JSON_SERIALIZER_ID),
                note(2, FLAKY_SERIALIZER_ID),
                note(3, JSON_SERIALIZER_ID),
            ];
            assert!(writer.deliver(deliveries).await.is_err());
            assert_eq!(writer.pending_deliveries(), 3);

            broken.set(true);
            writer.restart().await;
            let err = writer.start().await.expect_err("dropped delivery is reported");
            assert!(matches!(err, WriterError::Encoding(EncodingError::Serialize { .. })));
            assert_eq!(writer.state(), WriterState::Connected);

            assert_eq!(written_payloads(&transport), vec![vec![b"1".to_vec(), b"3".to_vec()]]);
            assert_eq!(writer.pending_deliveries(), 0);
            assert_eq!(writer.metrics().deliveries_dropped, 1);
        });
    }

    #[test]
    fn test_deliver_valid_writes_the_rest() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());
            writer.start().await.expect("start");

            let deliveries = vec![
                note(1, JSON_SERIALIZER_ID),
                note(2, 42),
                note(3, JSON_SERIALIZER_ID),
            ];
            let outcome = writer.deliver_valid(deliveries).await;

            assert_eq!(outcome.result, Ok(()));
            assert_eq!(
                outcome.rejected,
                vec![EncodingError::UnknownSerializer { serializer_id: 42 }]
            );
            assert_eq!(written_payloads(&transport), vec![vec![b"1".to_vec(), b"3".to_vec()]]);
            assert_eq!(writer.metrics().deliveries_dropped, 1);
        });
    }

    #[test]
    fn test_deliver_valid_parks_encodable_while_disconnected() {
        run_local(async {
            let transport = MemoryTransport::new();
            let (mut writer, _events) = writer(&transport, WriterConfig::default());

            let outcome = writer
                .deliver_valid(vec![note(1, 42), note(2, JSON_SERIALIZER_ID)])
                .await;
            assert_eq!(
                outcome.result,
                Err(WriterError::NotConnected {
                    state: WriterState::Uninitialized
                })
            );
            assert_eq!(outcome.rejected.len(), 1);
            assert_eq!(writer.pending_deliveries(), 1);

            writer.start().await.expect("start");
            assert_eq!(written_payloads(&transport), vec![vec![b"2".to_vec()]]);
        });
    }
}
