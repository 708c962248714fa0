use super::service::ConfirmationService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodic expiration sweep with an explicit start/stop lifecycle.
///
/// The task is bound to this handle: `stop` cancels and joins it, and
/// dropping the handle cancels it, so no timer outlives the service.
pub struct ExpirationSweeper {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ExpirationSweeper {
    pub fn start(service: Arc<ConfirmationService>, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match service.cleanup_expired_confirmations().await {
                            Ok(0) => {}
                            Ok(cleaned) => {
                                tracing::info!(cleaned, "expiration sweep cleaned confirmations");
                            }
                            Err(error) => {
                                tracing::warn!(error = %error, "expiration sweep failed");
                            }
                        }
                    }
                }
            }
        });
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel the sweep loop and wait for it to wind down.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ExpirationSweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ConfirmationService {
    /// Start the periodic sweep at the configured interval.
    pub fn start_sweeper(self: &Arc<Self>) -> ExpirationSweeper {
        ExpirationSweeper::start(
            Arc::clone(self),
            Duration::from_secs(self.sweep_interval_secs()),
        )
    }
}
