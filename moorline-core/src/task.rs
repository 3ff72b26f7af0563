//! Task spawning for single-threaded executors.

use std::future::Future;
use tokio::task::JoinHandle;

/// Spawns background tasks on the current thread.
///
/// Connection monitors and writer mailboxes are spawned through this trait
/// rather than through `tokio::spawn`, so their futures never need `Send`.
pub trait TaskProvider: Clone + 'static {
    /// Spawn `future` as a named local task.
    ///
    /// Must be called from within a `LocalSet`.
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// [`TaskProvider`] backed by `tokio::task::spawn_local`.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("task {} starting", task_name);
            future.await;
            tracing::trace!("task {} completed", task_name);
        })
    }
}
