use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Work that runs once after a delay unless cancelled first.
///
/// Dropping the handle does not cancel the work.
#[derive(Debug)]
pub struct DeferredTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl DeferredTask {
    pub fn schedule<F>(delay: Duration, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("Deferred task cancelled before it ran");
                }
                _ = tokio::time::sleep(delay) => {
                    work.await;
                }
            }
        });

        Self { handle, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to run or be cancelled.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            log::warn!("Deferred task did not complete: {e}");
        }
    }
}
