//! Spawned endpoint writers driven through their mailbox.

use std::time::Duration;

use moorline_remote::{
    ActorAddress, Delivery, EncodingError, EndpointWriter, EventStream, JSON_SERIALIZER_ID,
    MemoryTransport, RemoteMessage, SerializerRegistry, StreamManager, TokioTaskProvider,
    WriteEvent, WriterConfig, WriterError, spawn_endpoint_writer,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct Note(u32);

impl RemoteMessage for Note {
    fn type_name(&self) -> &str {
        "test.Note"
    }
}

const ADDRESS: &str = "node-b:4020";

fn run_local<F: std::future::Future<Output = ()>>(future: F) {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(tokio::task::LocalSet::new().run_until(future));
}

fn writer(
    transport: &MemoryTransport,
    config: WriterConfig,
) -> EndpointWriter<MemoryTransport, SerializerRegistry<Note>, TokioTaskProvider> {
    EndpointWriter::new(
        StreamManager::new(transport.clone(), ADDRESS, (), ()),
        SerializerRegistry::json(),
        EventStream::new(),
        TokioTaskProvider,
        config,
    )
}

fn note(n: u32) -> Delivery<Note> {
    Delivery::new(ActorAddress::new(ADDRESS, "inbox"), Note(n), JSON_SERIALIZER_ID)
}

#[test]
fn test_queued_deliveries_are_coalesced() {
    run_local(async {
        let transport = MemoryTransport::new();
        let (writer_ref, _failures) =
            spawn_endpoint_writer(writer(&transport, WriterConfig::default().with_batch_size(3)));
        writer_ref.start().await.expect("start");

        for n in 0..5 {
            writer_ref.send(note(n)).expect("send");
        }
        writer_ref.stop().await.expect("stop");

        let sizes: Vec<usize> = transport.written().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 2]);
        assert_eq!(transport.shutdowns(), 1);
    });
}

#[test]
fn test_writes_never_interleave() {
    run_local(async {
        let transport = MemoryTransport::new();
        transport.set_write_delay(Duration::from_millis(5));
        let (writer_ref, _failures) =
            spawn_endpoint_writer(writer(&transport, WriterConfig::default()));
        writer_ref.start().await.expect("start");

        let mut callers = Vec::new();
        for n in 0..4 {
            let writer_ref = writer_ref.clone();
            callers.push(tokio::task::spawn_local(async move {
                writer_ref.deliver(vec![note(n)]).await
            }));
        }
        for caller in callers {
            caller.await.expect("join").expect("deliver");
        }

        let log = transport.write_log();
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            assert!(matches!(pair[0], WriteEvent::Started { .. }));
            assert!(matches!(pair[1], WriteEvent::Finished { accepted: true, .. }));
        }
        writer_ref.stop().await.expect("stop");
    });
}

#[test]
fn test_write_failure_reaches_supervisor() {
    run_local(async {
        let transport = MemoryTransport::new();
        let (writer_ref, mut failures) =
            spawn_endpoint_writer(writer(&transport, WriterConfig::default()));
        writer_ref.start().await.expect("start");

        transport.fail_next_writes(1);
        writer_ref.send(note(0)).expect("send");

        let failure = failures.recv().await.expect("failure");
        assert_eq!(failure.address, ADDRESS);
        assert!(matches!(failure.error, WriterError::Write(_)));

        // Supervisor restarts; the buffered delivery goes out first.
        writer_ref.restart().await.expect("restart");
        writer_ref.start().await.expect("start");
        writer_ref.deliver(vec![note(1)]).await.expect("deliver");

        let sizes: Vec<usize> = transport.written().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![1, 1]);
        assert!(failures.try_recv().is_err());
    });
}

#[test]
fn test_mailbox_closes_after_stop() {
    run_local(async {
        let transport = MemoryTransport::new();
        let (writer_ref, _failures) =
            spawn_endpoint_writer(writer(&transport, WriterConfig::default()));
        writer_ref.start().await.expect("start");
        writer_ref.stop().await.expect("stop");

        assert!(writer_ref.closed());
        assert_eq!(writer_ref.start().await, Err(WriterError::MailboxClosed));
        assert_eq!(writer_ref.send(note(0)), Err(WriterError::MailboxClosed));
    });
}

#[test]
fn test_unencodable_send_is_dropped_alone() {
    run_local(async {
        let transport = MemoryTransport::new();
        let (writer_ref, mut failures) =
            spawn_endpoint_writer(writer(&transport, WriterConfig::default()));
        writer_ref.start().await.expect("start");

        let unknown_format = Delivery::new(ActorAddress::new(ADDRESS, "inbox"), Note(2), 42);
        writer_ref.send(note(1)).expect("send");
        writer_ref.send(unknown_format).expect("send");
        writer_ref.send(note(3)).expect("send");
        writer_ref.stop().await.expect("stop");

        let batches = transport.written();
        assert_eq!(batches.len(), 1);
        let payloads: Vec<&[u8]> = batches[0]
            .envelopes
            .iter()
            .map(|e| e.payload.as_slice())
            .collect();
        assert_eq!(payloads, vec![&b"1"[..], &b"3"[..]]);

        let failure = failures.recv().await.expect("encoding failure reported");
        assert_eq!(failure.address, ADDRESS);
        assert_eq!(
            failure.error,
            WriterError::Encoding(EncodingError::UnknownSerializer { serializer_id: 42 })
        );
        assert!(!failure.requires_restart());
        assert!(failures.try_recv().is_err());
    });
}
