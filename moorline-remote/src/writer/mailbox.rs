//! Sequential execution context for one endpoint writer.
//!
//! The writer runs on its own task and drains a single queue. Commands and
//! deliveries are handled strictly in arrival order, so no two writes to the
//! same address ever overlap.

use std::rc::Rc;

use moorline_core::TaskProvider;
use tokio::sync::{mpsc, oneshot};

use super::core::{EndpointWriter, WriterCommand, WriterState};
use crate::batch::Delivery;
use crate::error::WriterError;
use crate::serialization::Serialization;
use crate::transport::Transport;

type Reply = oneshot::Sender<Result<(), WriterError>>;

enum Mail<M> {
    Deliver(Delivery<M>),
    Command {
        command: WriterCommand<M>,
        reply: Option<Reply>,
    },
}

/// A failure reported on the supervisor channel.
///
/// Either a handler failure that calls for a restart, or a delivery queued
/// with [`EndpointWriterRef::send`] that was dropped because it failed to
/// encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterFailure {
    /// Address of the failing writer.
    pub address: String,
    /// What went wrong.
    pub error: WriterError,
}

impl WriterFailure {
    /// Whether the supervisor should restart the writer.
    pub fn requires_restart(&self) -> bool {
        self.error.requires_restart()
    }
}

/// Move `writer` onto its own task.
///
/// Returns the handle used to talk to it and the channel on which every
/// failure with [`WriterError::requires_restart`] is reported, along with one
/// [`WriterError::Encoding`] per queued delivery dropped for failing to
/// encode. The task
/// exits after handling `Stop` or once every handle is dropped, closing the
/// connection on the way out.
pub fn spawn_endpoint_writer<T, S, P>(
    writer: EndpointWriter<T, S, P>,
) -> (
    EndpointWriterRef<S::Message>,
    mpsc::UnboundedReceiver<WriterFailure>,
)
where
    T: Transport,
    S: Serialization,
    P: TaskProvider,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    let address: Rc<str> = Rc::from(writer.address());
    let task = writer.task().clone();

    task.spawn_task(
        &format!("endpoint_writer_{}", address),
        mailbox_loop(writer, rx, failures_tx),
    );

    (EndpointWriterRef { tx, address }, failures_rx)
}

async fn mailbox_loop<T, S, P>(
    mut writer: EndpointWriter<T, S, P>,
    mut rx: mpsc::UnboundedReceiver<Mail<S::Message>>,
    failures: mpsc::UnboundedSender<WriterFailure>,
) where
    T: Transport,
    S: Serialization,
    P: TaskProvider,
{
    let batch_size = writer.config().batch_size;
    let mut held: Option<Mail<S::Message>> = None;

    loop {
        let mail = match held.take() {
            Some(mail) => mail,
            None => match rx.recv().await {
                Some(mail) => mail,
                None => break,
            },
        };

        match mail {
            Mail::Deliver(first) => {
                let mut deliveries = vec![first];
                while deliveries.len() < batch_size {
                    match rx.try_recv() {
                        Ok(Mail::Deliver(next)) => deliveries.push(next),
                        Ok(other) => {
                            held = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                // Merged from independent senders: a bad delivery must not
                // sink the others, and nobody is waiting for the result.
                let outcome = writer.deliver_valid(deliveries).await;
                for error in outcome.rejected {
                    notify(&failures, writer.address(), WriterError::Encoding(error));
                }
                report(&failures, writer.address(), &outcome.result);
            }
            Mail::Command { command, reply } => {
                let is_stop = matches!(command, WriterCommand::Stop);
                let result = writer.handle(command).await;
                report(&failures, writer.address(), &result);
                if let Some(reply) = reply {
                    // The caller may have stopped waiting.
                    let _ = reply.send(result);
                }
                if is_stop {
                    break;
                }
            }
        }
    }

    if writer.state() == WriterState::Connected {
        writer.stop().await;
    }
    tracing::debug!(
        "endpoint writer for {} exited with {} undelivered",
        writer.address(),
        writer.pending_deliveries()
    );
}

fn report(
    failures: &mpsc::UnboundedSender<WriterFailure>,
    address: &str,
    result: &Result<(), WriterError>,
) {
    let Err(error) = result else {
        return;
    };
    if !error.requires_restart() {
        tracing::debug!("endpoint writer for {}: {}", address, error);
        return;
    }
    notify(failures, address, error.clone());
}

fn notify(failures: &mpsc::UnboundedSender<WriterFailure>, address: &str, error: WriterError) {
    let failure = WriterFailure {
        address: address.to_string(),
        error,
    };
    if failures.send(failure).is_err() {
        tracing::warn!("endpoint writer for {}: failure dropped, no supervisor", address);
    }
}

/// Handle to a spawned [`EndpointWriter`].
pub struct EndpointWriterRef<M> {
    tx: mpsc::UnboundedSender<Mail<M>>,
    address: Rc<str>,
}

impl<M> Clone for EndpointWriterRef<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            address: self.address.clone(),
        }
    }
}

impl<M> EndpointWriterRef<M> {
    /// Remote address of the writer.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the writer task has exited.
    pub fn closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue one delivery without waiting for it to be written.
    ///
    /// Consecutive queued deliveries are written together. If this one fails
    /// to encode it is dropped alone and reported on the failures channel.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::MailboxClosed`] if the writer has exited.
    pub fn send(&self, delivery: Delivery<M>) -> Result<(), WriterError> {
        self.tx
            .send(Mail::Deliver(delivery))
            .map_err(|_| WriterError::MailboxClosed)
    }

    /// Open the connection and wait for the result.
    ///
    /// # Errors
    ///
    /// See [`EndpointWriter::start`].
    pub async fn start(&self) -> Result<(), WriterError> {
        self.request(WriterCommand::Start).await
    }

    /// Stop the writer. Its task exits afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::MailboxClosed`] if the writer already exited.
    pub async fn stop(&self) -> Result<(), WriterError> {
        self.request(WriterCommand::Stop).await
    }

    /// Close the connection ahead of a new [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::MailboxClosed`] if the writer already exited.
    pub async fn restart(&self) -> Result<(), WriterError> {
        self.request(WriterCommand::Restart).await
    }

    /// Write `deliveries` as one batch and wait for the result.
    ///
    /// # Errors
    ///
    /// See [`EndpointWriter::deliver`].
    pub async fn deliver(&self, deliveries: Vec<Delivery<M>>) -> Result<(), WriterError> {
        self.request(WriterCommand::Deliver(deliveries)).await
    }

    async fn request(&self, command: WriterCommand<M>) -> Result<(), WriterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Mail::Command {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| WriterError::MailboxClosed)?;
        reply_rx.await.map_err(|_| WriterError::MailboxClosed)?
    }
}
