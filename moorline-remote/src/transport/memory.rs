//! In-process transport.
//!
//! Every batch written is recorded instead of leaving the process. Tests
//! use the shared handle to inject connect and write failures, slow writes
//! down, and drive the inbound half (acks, clean close, breakage).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{AckSource, BatchSink, InboundSignal, Transport};
use crate::batch::MessageBatch;
use crate::error::{ConnectionLostError, TransportError, TransportWriteError};

type InboundSender = mpsc::UnboundedSender<Result<InboundSignal, ConnectionLostError>>;

/// One step of a write as observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    /// `send` was entered.
    Started {
        /// Connection number (1-based, one per successful connect).
        connection: u64,
        /// Envelopes in the batch.
        envelopes: usize,
    },
    /// `send` resolved.
    Finished {
        /// Connection number.
        connection: u64,
        /// Envelopes in the batch.
        envelopes: usize,
        /// Whether the batch was accepted.
        accepted: bool,
    },
}

#[derive(Default)]
struct MemoryState {
    connect_attempts: usize,
    connects_to_fail: usize,
    writes_to_fail: usize,
    write_delay: Option<Duration>,
    connections: u64,
    shutdowns: usize,
    written: Vec<MessageBatch>,
    log: Vec<WriteEvent>,
    inbound: Option<InboundSender>,
}

/// Loopback [`Transport`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransport {
    /// Transport that accepts every connect and write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.borrow_mut().connects_to_fail = count;
    }

    /// Reject the next `count` batches.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.borrow_mut().writes_to_fail = count;
    }

    /// Hold every write for `delay` before resolving it.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.borrow_mut().write_delay = Some(delay);
    }

    /// Connect attempts so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.state.borrow().connect_attempts
    }

    /// Successful connects so far.
    pub fn connections_opened(&self) -> u64 {
        self.state.borrow().connections
    }

    /// Sink shutdowns so far.
    pub fn shutdowns(&self) -> usize {
        self.state.borrow().shutdowns
    }

    /// Batches accepted so far, in write order.
    pub fn written(&self) -> Vec<MessageBatch> {
        self.state.borrow().written.clone()
    }

    /// Start/finish events of every write, in order.
    pub fn write_log(&self) -> Vec<WriteEvent> {
        self.state.borrow().log.clone()
    }

    /// Push an acknowledgment into the current connection's inbound half.
    ///
    /// Returns false when no inbound half is listening.
    pub fn send_ack(&self) -> bool {
        self.push_inbound(Ok(InboundSignal::Ack))
    }

    /// Close the current connection's inbound half cleanly.
    pub fn close_inbound(&self) {
        self.state.borrow_mut().inbound = None;
    }

    /// Break the current connection's inbound half.
    pub fn break_inbound(&self, reason: &str) -> bool {
        let sent = self.push_inbound(Err(ConnectionLostError::new(reason)));
        self.state.borrow_mut().inbound = None;
        sent
    }

    fn push_inbound(&self, signal: Result<InboundSignal, ConnectionLostError>) -> bool {
        match &self.state.borrow().inbound {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }
}

#[async_trait(?Send)]
impl Transport for MemoryTransport {
    type Options = ();
    type Credentials = ();
    type Sink = MemorySink;
    type Source = MemorySource;

    async fn connect(
        &self,
        address: &str,
        _options: &(),
        _credentials: &(),
    ) -> Result<(MemorySink, MemorySource), TransportError> {
        let mut state = self.state.borrow_mut();
        state.connect_attempts += 1;
        if state.connects_to_fail > 0 {
            state.connects_to_fail -= 1;
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        state.connections += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound = Some(tx);
        let sink = MemorySink {
            state: self.state.clone(),
            connection: state.connections,
            closed: false,
        };
        Ok((sink, MemorySource { rx }))
    }
}

/// Outbound half of a [`MemoryTransport`] connection.
pub struct MemorySink {
    state: Rc<RefCell<MemoryState>>,
    connection: u64,
    closed: bool,
}

#[async_trait(?Send)]
impl BatchSink for MemorySink {
    async fn send(&mut self, batch: &MessageBatch) -> Result<(), TransportWriteError> {
        if self.closed {
            return Err(TransportWriteError::Closed);
        }
        let delay = {
            let mut state = self.state.borrow_mut();
            state.log.push(WriteEvent::Started {
                connection: self.connection,
                envelopes: batch.len(),
            });
            state.write_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.borrow_mut();
        let accepted = if state.writes_to_fail > 0 {
            state.writes_to_fail -= 1;
            false
        } else {
            state.written.push(batch.clone());
            true
        };
        state.log.push(WriteEvent::Finished {
            connection: self.connection,
            envelopes: batch.len(),
            accepted,
        });

        if accepted {
            Ok(())
        } else {
            Err(TransportWriteError::Io("injected write failure".to_string()))
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportWriteError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.state.borrow_mut();
        state.shutdowns += 1;
        // The remote answers a half-close by ending the response stream.
        if state.connections == self.connection {
            state.inbound = None;
        }
        Ok(())
    }
}

/// Inbound half of a [`MemoryTransport`] connection.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<InboundSignal, ConnectionLostError>>,
}

#[async_trait(?Send)]
impl AckSource for MemorySource {
    async fn recv(&mut self) -> Result<InboundSignal, ConnectionLostError> {
        match self.rx.recv().await {
            Some(signal) => signal,
            None => Ok(InboundSignal::Closed),
        }
    }
}
