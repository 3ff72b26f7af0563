//! Response monitor for one connection.
//!
//! Owns the inbound half and watches it until the remote closes it, it
//! breaks, or the stream manager asks it to stop. Whichever comes first, the
//! termination is published exactly once.

use std::cell::Cell;
use std::rc::Rc;

use moorline_core::TaskProvider;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::events::{EndpointTerminatedEvent, EventNotifier};
use crate::transport::{AckSource, InboundSignal};

/// Spawns response monitors.
pub struct ResponseMonitor;

impl ResponseMonitor {
    /// Start watching `source` on a background task.
    ///
    /// The returned handle stops the monitor. Dropping the handle aborts the
    /// task without publishing.
    pub fn spawn<P, S, E>(task: &P, address: String, source: S, notifier: E) -> MonitorHandle
    where
        P: TaskProvider,
        S: AckSource + 'static,
        E: EventNotifier + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let acks = Rc::new(Cell::new(0));
        let name = format!("response_monitor_{}", address);
        let join = task.spawn_task(
            &name,
            monitor_loop(address, source, notifier, stop_rx, acks.clone()),
        );

        MonitorHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
            acks,
        }
    }
}

enum Exit {
    Stopped,
    RemoteClosed,
    Lost(String),
}

async fn monitor_loop<S, E>(
    address: String,
    mut source: S,
    notifier: E,
    mut stop_rx: oneshot::Receiver<()>,
    acks: Rc<Cell<u64>>,
) where
    S: AckSource,
    E: EventNotifier,
{
    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break Exit::Stopped,

            signal = source.recv() => match signal {
                Ok(InboundSignal::Ack) => {
                    acks.set(acks.get() + 1);
                    tracing::trace!("response_monitor: ack from {}", address);
                }
                Ok(InboundSignal::Closed) => break Exit::RemoteClosed,
                Err(e) => break Exit::Lost(e.reason),
            },
        }
    };

    match exit {
        Exit::Stopped => {
            tracing::debug!("response_monitor: stopped locally for {}", address)
        }
        Exit::RemoteClosed => {
            tracing::warn!("Lost connection to address {}: remote closed the stream", address)
        }
        Exit::Lost(reason) => {
            tracing::error!("Lost connection to address {}, reason {}", address, reason)
        }
    }

    notifier.publish(EndpointTerminatedEvent { address });
}

/// Control handle of a running monitor.
pub struct MonitorHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    acks: Rc<Cell<u64>>,
}

impl MonitorHandle {
    /// Ask the monitor to stop and wait for it to publish and exit.
    ///
    /// If the monitor already finished on its own this only joins it.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // Err means the monitor already exited.
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                tracing::warn!("response_monitor: join failed: {}", e);
            }
        }
    }

    /// Acknowledgments observed so far.
    pub fn acks_received(&self) -> u64 {
        self.acks.get()
    }

    /// Whether the monitor task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, Transport};
    use moorline_core::TokioTaskProvider;
    use tokio::sync::mpsc;

    fn local_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    }

    #[test]
    fn test_remote_close_publishes_once() {
        local_runtime().block_on(tokio::task::LocalSet::new().run_until(async {
            let transport = MemoryTransport::new();
            let (_sink, source) = transport.connect("node-b", &(), &()).await.expect("connect");
            let (tx, mut rx) = mpsc::unbounded_channel();

            let handle =
                ResponseMonitor::spawn(&TokioTaskProvider, "node-b".to_string(), source, tx);
            assert!(transport.send_ack());
            transport.close_inbound();

            let event = rx.recv().await.expect("event");
            assert_eq!(event.address, "node-b");
            handle.stop().await;
            assert!(rx.try_recv().is_err());
        }));
    }

    #[test]
    fn test_local_stop_publishes_once() {
        local_runtime().block_on(tokio::task::LocalSet::new().run_until(async {
            let transport = MemoryTransport::new();
            let (_sink, source) = transport.connect("node-b", &(), &()).await.expect("connect");
            let (tx, mut rx) = mpsc::unbounded_channel();

            let handle =
                ResponseMonitor::spawn(&TokioTaskProvider, "node-b".to_string(), source, tx);
            tokio::task::yield_now().await;
            assert!(!handle.is_finished());

            handle.stop().await;
            assert_eq!(rx.try_recv().map(|e| e.address), Ok("node-b".to_string()));
            assert!(rx.try_recv().is_err());
        }));
    }

    #[test]
    fn test_counts_acks_and_reports_breakage() {
        local_runtime().block_on(tokio::task::LocalSet::new().run_until(async {
            let transport = MemoryTransport::new();
            let (_sink, source) = transport.connect("node-b", &(), &()).await.expect("connect");
            let (tx, mut rx) = mpsc::unbounded_channel();

            let handle =
                ResponseMonitor::spawn(&TokioTaskProvider, "node-b".to_string(), source, tx);
            assert!(transport.send_ack());
            assert!(transport.send_ack());
            assert!(transport.break_inbound("reset by peer"));

            rx.recv().await.expect("event");
            assert_eq!(handle.acks_received(), 2);
            assert!(rx.try_recv().is_err());
        }));
    }
}
