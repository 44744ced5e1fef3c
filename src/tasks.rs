//! Detached background work.

use anyhow::Context;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Run synchronous store work on the blocking pool.
pub async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking store task panicked")?
}

/// [`spawn_detached`] for synchronous store writes.
pub fn spawn_detached_blocking<F>(label: &'static str, f: F) -> JoinHandle<()>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    spawn_detached(label, run_blocking(f))
}

/// Run `fut` in the background. Its failure is logged and never reaches the
/// code that spawned it. The handle may be dropped.
pub fn spawn_detached<F>(label: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            warn!("Detached task {} failed: {:#}", label, err);
        }
    })
}
