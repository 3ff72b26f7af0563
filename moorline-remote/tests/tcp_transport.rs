//! Endpoint writer over real TCP on the loopback interface.
//!
//! The server side reads frames, decodes each payload as a `MessageBatch`,
//! answers every batch with an acknowledgment frame and finally closes.

use std::time::Duration;

use moorline_remote::{
    ActorAddress, Delivery, EndpointWriter, EventStream, Insecure, JSON_SERIALIZER_ID, JsonCodec,
    MAX_FRAME_SIZE, MessageBatch, MessageCodec, NetworkProvider, RemoteMessage,
    SerializerRegistry, StreamManager, TcpListenerTrait, TcpOptions, TcpTransport,
    TokioNetworkProvider, TokioTaskProvider, WriterConfig, WriterError, ack_frame,
    try_decode_frame,
};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Serialize)]
struct Note(u32);

impl RemoteMessage for Note {
    fn type_name(&self) -> &str {
        "test.Note"
    }
}

fn run_local<F: std::future::Future<Output = ()>>(future: F) {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(tokio::task::LocalSet::new().run_until(future));
}

/// Accept one connection, ack `expected` batches, then close it.
async fn serve_batches<L: TcpListenerTrait>(listener: L, expected: usize) -> Vec<MessageBatch> {
    let (mut stream, _peer) = listener.accept().await.expect("accept");
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut batches = Vec::new();

    while batches.len() < expected {
        let n = stream.read(&mut chunk).await.expect("read");
        assert!(n > 0, "client closed before sending every batch");
        buffer.extend_from_slice(&chunk[..n]);

        while let Some((payload, consumed)) =
            try_decode_frame(&buffer, MAX_FRAME_SIZE).expect("frame")
        {
            buffer.drain(..consumed);
            let batch: MessageBatch = JsonCodec.decode(&payload).expect("batch");
            batches.push(batch);
            stream.write_all(&ack_frame()).await.expect("ack");
        }
    }

    stream.shutdown().await.expect("shutdown");
    batches
}

#[test]
fn test_round_trip_and_remote_close() {
    run_local(async {
        let network = TokioNetworkProvider::new().with_nodelay(true);
        let listener = network.bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        let server = tokio::task::spawn_local(serve_batches(listener, 2));

        let events = EventStream::new();
        let (_id, mut terminated) = events.subscribe_channel();
        let options = TcpOptions::default().with_connect_timeout(Duration::from_secs(5));
        let transport = TcpTransport::new(network);
        let stream = StreamManager::new(transport, address.clone(), options, Insecure);
        let mut writer = EndpointWriter::new(
            stream,
            SerializerRegistry::<Note>::json(),
            events,
            TokioTaskProvider,
            WriterConfig::default(),
        );

        writer.start().await.expect("start");
        let target = ActorAddress::new(address.clone(), "inbox");
        let sender = ActorAddress::new("127.0.0.1:9", "client");
        writer
            .deliver(vec![
                Delivery::new(target.clone(), Note(1), JSON_SERIALIZER_ID)
                    .with_sender(sender.clone()),
                Delivery::new(target.clone(), Note(2), JSON_SERIALIZER_ID),
            ])
            .await
            .expect("first batch");
        writer
            .deliver(vec![Delivery::new(target, Note(3), JSON_SERIALIZER_ID)])
            .await
            .expect("second batch");

        let batches = server.await.expect("server");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].target_names, vec!["inbox"]);
        assert_eq!(batches[0].type_names, vec!["test.Note"]);
        assert_eq!(batches[0].envelopes[0].sender, Some(sender));
        assert_eq!(batches[0].envelopes[1].payload, b"2");
        assert_eq!(batches[1].envelopes[0].payload, b"3");

        let event = terminated.recv().await.expect("terminated");
        assert_eq!(event.address, address);
        assert_eq!(writer.stream().acks_received(), 2);

        writer.stop().await;
        assert!(terminated.try_recv().is_err());
    });
}

#[test]
fn test_connect_refused() {
    run_local(async {
        let network = TokioNetworkProvider::new();
        // Bind then drop to get a port nobody listens on.
        let address = {
            let listener = network.bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("local addr")
        };

        let stream = StreamManager::new(
            TcpTransport::new(network),
            address,
            TcpOptions::default(),
            Insecure,
        );
        let mut writer = EndpointWriter::new(
            stream,
            SerializerRegistry::<Note>::json(),
            EventStream::new(),
            TokioTaskProvider,
            WriterConfig::default(),
        );

        let err = writer.start().await.expect_err("nothing listening");
        assert!(matches!(err, WriterError::Connect(_)));
    });
}
