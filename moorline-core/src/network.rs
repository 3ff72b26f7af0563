//! Where link connections come from.
//!
//! A transport never names `tokio::net`. It asks a [`NetworkProvider`] for a
//! stream to the remote address, so the writer can be driven over an
//! in-process network in tests and over real sockets in production.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Source of duplex byte streams for outbound links.
///
/// Futures are not `Send`; providers are cloned into each transport.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// Stream carrying one link's frames and acks.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// Listener handing out [`Self::TcpStream`]s, used by peers and tests.
    type TcpListener: TcpListenerTrait<TcpStream = Self::TcpStream> + 'static;

    /// Listen on `addr`. Port `0` picks a free port.
    async fn bind(&self, addr: &str) -> io::Result<Self::TcpListener>;

    /// Dial the remote end of a link.
    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream>;
}

/// Accepting side of a link.
#[async_trait(?Send)]
pub trait TcpListenerTrait {
    /// Stream type returned by [`accept`](Self::accept).
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Next inbound stream, with the dialer's address.
    async fn accept(&self) -> io::Result<(Self::TcpStream, String)>;

    /// Bound address, with the real port when `0` was requested.
    fn local_addr(&self) -> io::Result<String>;
}

/// Sockets from `tokio::net`.
///
/// The `TCP_NODELAY` setting applies to dialed and accepted streams alike.
#[derive(Debug, Clone, Default)]
pub struct TokioNetworkProvider {
    nodelay: bool,
}

impl TokioNetworkProvider {
    /// Provider with Nagle's algorithm left at the OS default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on every stream. A writer sends one frame per
    /// batch and waits on nothing, so small frames should leave at once.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    fn configure(nodelay: bool, stream: &tokio::net::TcpStream) -> io::Result<()> {
        if nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type TcpStream = tokio::net::TcpStream;
    type TcpListener = TokioTcpListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::TcpListener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        debug!(requested = addr, bound = ?inner.local_addr().ok(), "listener bound");
        Ok(TokioTcpListener {
            inner,
            nodelay: self.nodelay,
        })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        Self::configure(self.nodelay, &stream)?;
        trace!(remote = addr, nodelay = self.nodelay, "stream dialed");
        Ok(stream)
    }
}

/// Listener returned by [`TokioNetworkProvider::bind`].
#[derive(Debug)]
pub struct TokioTcpListener {
    inner: tokio::net::TcpListener,
    nodelay: bool,
}

#[async_trait(?Send)]
impl TcpListenerTrait for TokioTcpListener {
    type TcpStream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::TcpStream, String)> {
        let (stream, peer) = self.inner.accept().await?;
        TokioNetworkProvider::configure(self.nodelay, &stream)?;
        trace!(%peer, "stream accepted");
        Ok((stream, peer.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        self.inner.local_addr().map(|addr| addr.to_string())
    }
}
