//! Thin spawn helpers so that every background task (dispatcher worker,
//! debounce sweeper, async job) is named and logs its own panics/errors
//! instead of silently dying.
use std::future::Future;
use tokio::task::JoinHandle;

/// Spawn a named, long-running task on the current tokio runtime. If the
/// task's future returns an error, it is logged with the task's name
/// rather than propagated, since these tasks are expected to loop for the
/// lifetime of the process.
pub fn spawn_named<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            tracing::error!("task '{name}' exited with error: {err:#}");
        } else {
            tracing::debug!("task '{name}' exited");
        }
    })
}

/// Spawn a blocking closure on the blocking thread pool, logging (rather
/// than panicking on) a join error.
pub async fn spawn_blocking_named<F, T>(name: &'static str, f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!("blocking task '{name}' panicked: {err:#}");
            None
        }
    }
}
