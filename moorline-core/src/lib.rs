//! # moorline-core
//!
//! Runtime abstractions the moorline link driver is written against.
//!
//! - [`NetworkProvider`]: opening outbound TCP streams and binding listeners
//! - [`TaskProvider`]: spawning background tasks on the current thread
//! - [`MessageCodec`]: turning wire structures into bytes
//!
//! All providers assume a single-threaded executor. Nothing here requires
//! `Send`, so background work runs on a tokio `LocalSet`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod task;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use network::{NetworkProvider, TcpListenerTrait, TokioNetworkProvider, TokioTcpListener};
pub use task::{TaskProvider, TokioTaskProvider};
