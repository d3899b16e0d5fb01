use std::future::Future;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Turns SIGTERM or SIGINT into a cancelled token, so the server can drain and exit.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let on_signal = token.clone();
        task_tracker.spawn(async move {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = on_signal.cancelled() => return,
            };
            tracing::info!(signal = name, "Shutting down");
            on_signal.cancel();
        });
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    /// Returns a clone of the cancellation token for distributing to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Future for `axum::serve(..).with_graceful_shutdown`.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.cancellation_token.clone();
        async move { token.cancelled().await }
    }

    /// Shuts down without a signal.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Waits until shutdown was requested and the signal task has finished.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
