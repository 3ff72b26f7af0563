//! Batches over a byte stream.
//!
//! Each batch is encoded with the transport's [`MessageCodec`] and written
//! as one frame (see [`wire`](crate::wire)). The remote answers with empty
//! frames; any complete frame counts as an acknowledgment.

use std::time::Duration;

use async_trait::async_trait;
use moorline_core::{JsonCodec, MessageCodec, NetworkProvider};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::{AckSource, BatchSink, InboundSignal, Transport};
use crate::batch::MessageBatch;
use crate::error::{ConnectionLostError, TransportError, TransportWriteError};
use crate::wire::{encode_frame, try_decode_frame, MAX_ENCODABLE_PAYLOAD, MAX_FRAME_SIZE};

/// Connection options for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Give up connecting after this long. `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
    /// Largest frame payload accepted in either direction.
    pub max_frame_size: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl TcpOptions {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the frame size limit, capped at what the length field can carry.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(MAX_ENCODABLE_PAYLOAD);
        self
    }
}

/// Plaintext credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct Insecure;

/// [`Transport`] over streams from a [`NetworkProvider`].
#[derive(Debug, Clone)]
pub struct TcpTransport<N: NetworkProvider, C: MessageCodec = JsonCodec> {
    network: N,
    codec: C,
}

impl<N: NetworkProvider> TcpTransport<N> {
    /// Transport encoding batches as JSON.
    pub fn new(network: N) -> Self {
        Self {
            network,
            codec: JsonCodec,
        }
    }
}

impl<N: NetworkProvider, C: MessageCodec> TcpTransport<N, C> {
    /// Transport encoding batches with `codec`.
    pub fn with_codec(network: N, codec: C) -> Self {
        Self { network, codec }
    }
}

#[async_trait(?Send)]
impl<N, C> Transport for TcpTransport<N, C>
where
    N: NetworkProvider + 'static,
    C: MessageCodec,
{
    type Options = TcpOptions;
    type Credentials = Insecure;
    type Sink = TcpBatchSink<N::TcpStream, C>;
    type Source = TcpAckSource<N::TcpStream>;

    async fn connect(
        &self,
        address: &str,
        options: &TcpOptions,
        _credentials: &Insecure,
    ) -> Result<(Self::Sink, Self::Source), TransportError> {
        let connecting = self.network.connect(address);
        let result = match options.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(TransportError::ConnectTimeout {
                        address: address.to_string(),
                        timeout,
                    })
                }
            },
            None => connecting.await,
        };
        let stream = result.map_err(|e| TransportError::ConnectFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        let (reader, writer) = tokio::io::split(stream);
        let sink = TcpBatchSink {
            writer,
            codec: self.codec.clone(),
            max_frame_size: options.max_frame_size,
            closed: false,
        };
        let source = TcpAckSource {
            reader,
            buffer: Vec::with_capacity(256),
            max_frame_size: options.max_frame_size,
        };
        Ok((sink, source))
    }
}

/// Write half of a [`TcpTransport`] connection.
pub struct TcpBatchSink<S, C> {
    writer: WriteHalf<S>,
    codec: C,
    max_frame_size: usize,
    closed: bool,
}

#[async_trait(?Send)]
impl<S, C> BatchSink for TcpBatchSink<S, C>
where
    S: AsyncRead + AsyncWrite + 'static,
    C: MessageCodec,
{
    async fn send(&mut self, batch: &MessageBatch) -> Result<(), TransportWriteError> {
        if self.closed {
            return Err(TransportWriteError::Closed);
        }
        let payload = self.codec.encode(batch)?;
        let frame = encode_frame(&payload, self.max_frame_size)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportWriteError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Read half of a [`TcpTransport`] connection.
pub struct TcpAckSource<S> {
    reader: ReadHalf<S>,
    buffer: Vec<u8>,
    max_frame_size: usize,
}

#[async_trait(?Send)]
impl<S> AckSource for TcpAckSource<S>
where
    S: AsyncRead + AsyncWrite + 'static,
{
    async fn recv(&mut self) -> Result<InboundSignal, ConnectionLostError> {
        let mut chunk = [0u8; 1024];
        loop {
            let frame = try_decode_frame(&self.buffer, self.max_frame_size)?;
            if let Some((_payload, consumed)) = frame {
                self.buffer.drain(..consumed);
                return Ok(InboundSignal::Ack);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(InboundSignal::Closed);
                }
                return Err(ConnectionLostError::new(format!(
                    "stream closed with {} bytes of a partial frame",
                    self.buffer.len()
                )));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_limit_is_capped_at_length_field() {
        let options = TcpOptions::default().with_max_frame_size(usize::MAX);
        assert_eq!(options.max_frame_size, MAX_ENCODABLE_PAYLOAD);

        let options = TcpOptions::default().with_max_frame_size(1024);
        assert_eq!(options.max_frame_size, 1024);
    }
}
