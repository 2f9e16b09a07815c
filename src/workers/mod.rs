// Periodic workers and their supervisor
pub mod buy;
pub mod profit;
pub mod sell;

pub use buy::{BuyOutcome, BuyWorker};
pub use profit::ProfitWorker;
pub use sell::{ReconcileReport, SellWorker};

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A unit of periodic work run under `spawn_worker`
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One cycle. Long waits inside a cycle should select on `shutdown`.
    async fn process(&self, shutdown: &CancellationToken) -> anyhow::Result<()>;
}

/// Run `worker` every `period` until `shutdown` fires.
///
/// Each cycle runs in its own task. An error or a panic is logged and the
/// worker is relaunched after the usual period; nothing here ever stops the
/// process. A zero period is rejected.
pub fn spawn_worker(
    worker: Arc<dyn Worker>,
    period: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    if period.is_zero() {
        anyhow::bail!("worker {} has a zero schedule period", worker.name());
    }

    tracing::info!(worker = worker.name(), ?period, "⚙️  Worker started");
    Ok(tokio::spawn(supervise(worker, period, shutdown)))
}

async fn supervise(worker: Arc<dyn Worker>, period: Duration, shutdown: CancellationToken) {
    let name = worker.name().to_string();

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let job = {
            let worker = worker.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { worker.process(&token).await })
        };
        let abort = job.abort_handle();

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => {
                abort.abort();
                break;
            }
            outcome = job => outcome,
        };

        match outcome {
            Ok(Ok(())) => tracing::debug!(worker = %name, "Worker cycle complete"),
            Ok(Err(e)) => tracing::error!(worker = %name, "Worker cycle failed: {:#}", e),
            Err(e) if e.is_panic() => tracing::error!(
                worker = %name,
                "Worker panicked, relaunching: {}",
                panic_message(e.into_panic())
            ),
            Err(e) => tracing::warn!(worker = %name, "Worker cycle cancelled: {}", e),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }

    tracing::info!(worker = %name, "Worker stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
