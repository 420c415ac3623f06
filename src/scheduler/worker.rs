//! Dispatch worker — the single background loop that drains due items
//! and hands them to the transport.
//!
//! Started lazily on the first `schedule()` call, stopped through
//! `WorkerHandle::stop` with a bounded join. A cycle that panics is
//! logged and followed by the error-backoff interval; the loop itself
//! never terminates on its own. There is no engine-level timeout on an
//! in-flight `send()` — a transport that never returns stalls the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::EngineShared;
use super::item::{DeliveryStatus, ScheduledItem};

/// Handle to the running dispatch worker.
pub(crate) struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait up to `grace` for the loop to exit,
    /// aborting it past the deadline.
    pub(crate) async fn stop(self, grace: Duration) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();

        let abort = self.handle.abort_handle();
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            warn!("Dispatch worker did not stop within grace period, aborting");
            abort.abort();
        }
    }
}

/// Spawn the dispatch loop on the current runtime.
pub(crate) fn spawn_worker(shared: Arc<EngineShared>) -> WorkerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());

    let handle = tokio::spawn(run_loop(
        shared,
        Arc::clone(&shutdown),
        Arc::clone(&wake),
    ));

    WorkerHandle {
        shutdown,
        wake,
        handle,
    }
}

async fn run_loop(shared: Arc<EngineShared>, shutdown: Arc<AtomicBool>, wake: Arc<Notify>) {
    info!(
        poll_interval = ?shared.config.poll_interval,
        "Dispatch worker started"
    );

    let mut wait = shared.config.poll_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wake.notified() => {}
        }

        if shutdown.load(Ordering::Relaxed) {
            info!("Dispatch worker stopped");
            return;
        }

        wait = match AssertUnwindSafe(run_cycle(&shared)).catch_unwind().await {
            Ok(_) => shared.config.poll_interval,
            Err(_) => {
                error!("Dispatch cycle panicked, backing off");
                shared.config.error_backoff
            }
        };
    }
}

/// One due-check cycle. Items are dispatched in ascending
/// `(priority_score, sequence)` order; a continuous stream of
/// high-priority items can delay low-priority ones indefinitely.
async fn run_cycle(shared: &EngineShared) -> usize {
    let now = Utc::now();
    let due = shared.queue.pop_due(now).await;
    if due.is_empty() {
        return 0;
    }

    debug!(count = due.len(), "Dispatching due items");
    let count = due.len();
    for item in due {
        dispatch_item(shared, item).await;
    }
    count
}

/// Attempt delivery of one item and apply the success/retry/failed
/// transition. A transport panic is treated like any transient failure
/// so the item is never lost.
pub(crate) async fn dispatch_item(shared: &EngineShared, mut item: ScheduledItem) {
    let _ = item.transition_to(DeliveryStatus::Processing);

    let outcome = AssertUnwindSafe(shared.transport.send(&item.response))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(true)) => {
            let _ = item.transition_to(DeliveryStatus::Sent);
            shared.record_send(Utc::now()).await;
            info!(
                item_id = %item.id,
                recipient = %item.response.recipient,
                retries = item.retry_count,
                "Response sent"
            );
            shared.sent.write().await.push(item);
            shared.counters.sent.fetch_add(1, Ordering::Relaxed);
        }
        outcome => {
            match &outcome {
                Ok(Err(e)) => {
                    warn!(item_id = %item.id, error = %e, "Transport error")
                }
                Err(_) => error!(item_id = %item.id, "Transport panicked"),
                Ok(Ok(_)) => {}
            }
            retry_or_fail(shared, item).await;
        }
    }
}

async fn retry_or_fail(shared: &EngineShared, mut item: ScheduledItem) {
    item.retry_count += 1;

    if !item.retries_exhausted() {
        let delay = item.backoff_delay(shared.config.backoff_base);
        item.scheduled_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::minutes(2));
        let _ = item.transition_to(DeliveryStatus::Scheduled);
        warn!(
            item_id = %item.id,
            retry = item.retry_count,
            delay_secs = delay.as_secs(),
            "Send failed, rescheduled with backoff"
        );
        // The only place items re-enter the queue after creation
        shared.queue.push(item).await;
    } else {
        let _ = item.transition_to(DeliveryStatus::Failed);
        warn!(
            item_id = %item.id,
            retries = item.retry_count,
            "Retry ceiling reached, marking failed"
        );
        shared.failed.write().await.push(item);
        shared.counters.failed.fetch_add(1, Ordering::Relaxed);
    }
}
