//! Long-running background task abstraction, shared by every component that
//! owns a run loop: the scheduler tick loop, the pool's delayed-retry
//! dispatcher, and the HTTP observability server.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A cooperatively-cancellable background task.
#[async_trait]
pub trait Service: Send {
    /// Short, stable name used in logs.
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` is cancelled or the service errors out.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Spawns a [`Service`] on the current runtime, logging entry/exit.
pub fn spawn(service: Box<dyn Service>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let name = service.name();
    tokio::spawn(async move {
        tracing::info!(service = name, "starting service");
        match service.run(shutdown).await {
            Ok(()) => tracing::info!(service = name, "service exited cleanly"),
            Err(err) => tracing::error!(service = name, error = %err, "service exited with error"),
        }
    })
}
