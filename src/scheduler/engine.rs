//! Scheduler facade — the public entry point for the ticketing pipeline.
//!
//! Owns the queue, the rule registry, the terminal record lists, and the
//! dispatch worker's lifecycle. All operations are safe to call
//! concurrently with each other and with the worker loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::RuleError;
use crate::response::ComposedResponse;
use crate::rules::{ConditionType, RulePatch, RuleRegistry, SendingRule};
use crate::transport::Transport;

use super::evaluator::{self, EvalContext};
use super::item::{DeliveryStatus, ScheduledItem};
use super::queue::DispatchQueue;
use super::worker::{self, WorkerHandle};

/// Live scheduling counters.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Total items ever scheduled.
    pub scheduled: u64,
    /// Items delivered successfully.
    pub sent: u64,
    /// Items that exhausted their retries.
    pub failed: u64,
    /// Items currently queued.
    pub queue_size: usize,
    /// Active rules in the registry.
    pub active_rule_count: usize,
}

pub(crate) struct Counters {
    pub(crate) scheduled: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// State shared between the facade and the dispatch worker.
pub(crate) struct EngineShared {
    pub(crate) config: SchedulerConfig,
    pub(crate) queue: DispatchQueue,
    pub(crate) rules: RuleRegistry,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) sent: RwLock<Vec<ScheduledItem>>,
    pub(crate) failed: RwLock<Vec<ScheduledItem>>,
    pub(crate) cancelled: RwLock<Vec<ScheduledItem>>,
    pub(crate) counters: Counters,
    /// Timestamps of recent successful sends, pruned to the last minute.
    send_times: Mutex<VecDeque<DateTime<Utc>>>,
}

impl EngineShared {
    pub(crate) fn new(
        config: SchedulerConfig,
        transport: Arc<dyn Transport>,
        rules: RuleRegistry,
    ) -> Self {
        Self {
            config,
            queue: DispatchQueue::new(),
            rules,
            transport,
            sent: RwLock::new(Vec::new()),
            failed: RwLock::new(Vec::new()),
            cancelled: RwLock::new(Vec::new()),
            counters: Counters {
                scheduled: AtomicU64::new(0),
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            },
            send_times: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a successful send into the sliding volume window.
    pub(crate) async fn record_send(&self, at: DateTime<Utc>) {
        let mut times = self.send_times.lock().await;
        times.push_back(at);
        let cutoff = at - chrono::Duration::seconds(60);
        while times.front().is_some_and(|t| *t < cutoff) {
            times.pop_front();
        }
    }

    /// Whether the per-minute send ceiling is currently tripped. The
    /// ceiling comes from an active volume rule, falling back to the
    /// config value; 0 disables the check.
    pub(crate) async fn volume_exceeded(&self, now: DateTime<Utc>, rules: &[SendingRule]) -> bool {
        let limit = rules
            .iter()
            .find(|r| r.is_active && r.condition_type == ConditionType::VolumeBased)
            .and_then(|r| r.condition_i64("max_per_minute"))
            .unwrap_or(i64::from(self.config.max_sends_per_minute));
        if limit <= 0 {
            return false;
        }

        let cutoff = now - chrono::Duration::seconds(60);
        let times = self.send_times.lock().await;
        times.iter().filter(|t| **t >= cutoff).count() as i64 >= limit
    }
}

/// Public entry point: schedules composed responses for dispatch.
///
/// The queue is in-memory only and not persisted across restarts; nothing
/// coordinates multiple engine instances. Dispatch is at-least-effort,
/// not exactly-once.
pub struct ResponseScheduler {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl ResponseScheduler {
    /// Create a scheduler with default config and the standard rules.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, SchedulerConfig::default())
    }

    /// Create a scheduler with a custom config and the standard rules.
    pub fn with_config(transport: Arc<dyn Transport>, config: SchedulerConfig) -> Self {
        Self::with_rules(transport, config, RuleRegistry::default_rules())
    }

    /// Create a scheduler with a custom config and rule registry.
    pub fn with_rules(
        transport: Arc<dyn Transport>,
        config: SchedulerConfig,
        rules: RuleRegistry,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared::new(config, transport, rules)),
            worker: Mutex::new(None),
        }
    }

    /// Schedule a composed response for dispatch. Returns the item ID.
    ///
    /// Evaluates timing and priority against a snapshot of the active
    /// rules, enqueues the item, and starts the dispatch worker if it is
    /// not already running. Never blocks on dispatch; delivery failures
    /// surface later through `stats()` and `list()`.
    pub async fn schedule(&self, response: ComposedResponse, send_immediately: bool) -> Uuid {
        let rules = self.shared.rules.active().await;
        let now = Utc::now();
        let ctx = EvalContext {
            now,
            force_immediate: send_immediately,
            volume_exceeded: self.shared.volume_exceeded(now, &rules).await,
            business_hours: self.shared.config.business_hours,
            batch_interval: self.shared.config.batch_interval,
        };

        let decision = evaluator::evaluate(&response, &rules, &ctx);
        let item = ScheduledItem::new(response, &decision, self.shared.config.max_retries);
        let id = item.id;

        info!(
            item_id = %id,
            recipient = %item.response.recipient,
            score = decision.priority_score,
            scheduled_at = %decision.scheduled_at,
            rule = %decision.applied_rule,
            "Response scheduled"
        );

        self.shared.queue.push(item).await;
        self.shared.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        self.ensure_worker().await;

        id
    }

    /// Cancel a scheduled item. Best-effort: returns true only if the
    /// item was still queued; once dispatch has begun (or the item is
    /// terminal or unknown) this returns false with no side effects.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.shared.queue.remove(id).await {
            Some(mut item) => {
                let _ = item.transition_to(DeliveryStatus::Cancelled);
                info!(item_id = %id, "Scheduled response cancelled");
                self.shared.cancelled.write().await.push(item);
                true
            }
            None => {
                debug!(item_id = %id, "Cancel missed — item not in queue");
                false
            }
        }
    }

    /// All known items: the queue snapshot merged with the sent, failed,
    /// and cancelled records, optionally filtered by status.
    pub async fn list(&self, status: Option<DeliveryStatus>) -> Vec<ScheduledItem> {
        let mut items = self.shared.queue.snapshot().await;
        items.extend(self.shared.sent.read().await.iter().cloned());
        items.extend(self.shared.failed.read().await.iter().cloned());
        items.extend(self.shared.cancelled.read().await.iter().cloned());

        if let Some(status) = status {
            items.retain(|i| i.status == status);
        }
        items
    }

    /// Live counters for the observability layer.
    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.shared.counters.scheduled.load(Ordering::Relaxed),
            sent: self.shared.counters.sent.load(Ordering::Relaxed),
            failed: self.shared.counters.failed.load(Ordering::Relaxed),
            queue_size: self.shared.queue.len().await,
            active_rule_count: self.shared.rules.active_count().await,
        }
    }

    /// Add a sending rule. Takes effect on the next `schedule()` call;
    /// already-queued items keep their timing.
    pub async fn add_rule(&self, rule: SendingRule) -> Uuid {
        self.shared.rules.add(rule).await
    }

    /// Patch a sending rule. Takes effect on the next `schedule()` call.
    pub async fn update_rule(&self, id: Uuid, patch: RulePatch) -> Result<(), RuleError> {
        self.shared.rules.update(id, patch).await
    }

    /// Snapshot of all rules.
    pub async fn rules(&self) -> Vec<SendingRule> {
        self.shared.rules.all().await
    }

    /// Whether the dispatch worker has been started.
    pub async fn is_worker_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Stop the dispatch worker with a bounded wait. Queued items stay
    /// queued; a later `schedule()` call starts a fresh worker.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            handle.stop(self.shared.config.shutdown_grace).await;
        }
    }

    async fn ensure_worker(&self) {
        let mut guard = self.worker.lock().await;
        if guard.is_none() {
            debug!("Starting dispatch worker");
            *guard = Some(worker::spawn_worker(Arc::clone(&self.shared)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::TransportError;
    use crate::response::{PriorityTier, ResponseKind};
    use crate::rules::RuleAction;

    struct AlwaysOk;

    #[async_trait]
    impl Transport for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn send(&self, _: &ComposedResponse) -> Result<bool, TransportError> {
            Ok(true)
        }
    }

    /// Config whose worker sleeps long enough that queued items stay
    /// queued for the duration of a test.
    fn idle_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(600),
            ..SchedulerConfig::default()
        }
    }

    fn make_response() -> ComposedResponse {
        ComposedResponse::new(
            "user@example.com",
            "Re: ticket",
            "body",
            PriorityTier::Medium,
            ResponseKind::Acknowledgment,
        )
    }

    #[tokio::test]
    async fn schedule_enqueues_and_starts_worker() {
        let scheduler = ResponseScheduler::with_rules(
            Arc::new(AlwaysOk),
            idle_config(),
            RuleRegistry::new(),
        );
        assert!(!scheduler.is_worker_running().await);

        let id = scheduler.schedule(make_response(), true).await;
        assert!(scheduler.is_worker_running().await);

        let stats = scheduler.stats().await;
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.queue_size, 1);
        assert_eq!(stats.sent, 0);

        let queued = scheduler.list(Some(DeliveryStatus::Scheduled)).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, id);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_best_effort() {
        let scheduler = ResponseScheduler::with_rules(
            Arc::new(AlwaysOk),
            idle_config(),
            RuleRegistry::new(),
        );

        let id = scheduler.schedule(make_response(), true).await;
        assert!(scheduler.cancel(id).await);
        // Second cancel finds nothing
        assert!(!scheduler.cancel(id).await);
        // Unknown ID
        assert!(!scheduler.cancel(Uuid::new_v4()).await);

        let cancelled = scheduler.list(Some(DeliveryStatus::Cancelled)).await;
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].status, DeliveryStatus::Cancelled);
        assert_eq!(scheduler.stats().await.queue_size, 0);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn list_merges_queue_and_terminal_records() {
        let scheduler = ResponseScheduler::with_rules(
            Arc::new(AlwaysOk),
            idle_config(),
            RuleRegistry::new(),
        );

        let kept = scheduler.schedule(make_response(), true).await;
        let dropped = scheduler.schedule(make_response(), true).await;
        scheduler.cancel(dropped).await;

        let all = scheduler.list(None).await;
        assert_eq!(all.len(), 2);
        let ids: Vec<Uuid> = all.iter().map(|i| i.id).collect();
        assert!(ids.contains(&kept));
        assert!(ids.contains(&dropped));

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn stats_reports_active_rules() {
        let scheduler = ResponseScheduler::with_config(Arc::new(AlwaysOk), idle_config());
        assert_eq!(scheduler.stats().await.active_rule_count, 3);

        scheduler
            .add_rule(SendingRule::new(
                "extra",
                ConditionType::PriorityBased,
                RuleAction::Escalate,
            ))
            .await;
        assert_eq!(scheduler.stats().await.active_rule_count, 4);
    }

    #[tokio::test]
    async fn rule_update_applies_to_next_schedule_only() {
        let scheduler = ResponseScheduler::with_config(Arc::new(AlwaysOk), idle_config());

        let rule_id = scheduler
            .rules()
            .await
            .into_iter()
            .find(|r| r.name == "vip_bypass")
            .map(|r| r.id)
            .unwrap();

        let before = scheduler.schedule(make_response().for_vip(), true).await;

        scheduler
            .update_rule(
                rule_id,
                RulePatch {
                    condition_params: Some(
                        serde_json::json!({"customer_tier": "vip", "priority_boost": 40}),
                    ),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let after = scheduler.schedule(make_response().for_vip(), true).await;

        let items = scheduler.list(None).await;
        let before_item = items.iter().find(|i| i.id == before).unwrap();
        let after_item = items.iter().find(|i| i.id == after).unwrap();

        // The first item keeps the score it got at schedule() time
        assert_eq!(before_item.priority_score, 20); // 50 - 30
        assert_eq!(after_item.priority_score, 10); // 50 - 40

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn update_unknown_rule_returns_error() {
        let scheduler = ResponseScheduler::with_config(Arc::new(AlwaysOk), idle_config());
        let result = scheduler
            .update_rule(Uuid::new_v4(), RulePatch::default())
            .await;
        assert!(matches!(result, Err(RuleError::NotFound { .. })));
    }

    #[tokio::test]
    async fn volume_window_trips_and_recovers() {
        let config = SchedulerConfig {
            max_sends_per_minute: 2,
            ..idle_config()
        };
        let shared = EngineShared::new(config, Arc::new(AlwaysOk), RuleRegistry::new());

        let now = Utc::now();
        assert!(!shared.volume_exceeded(now, &[]).await);

        shared.record_send(now).await;
        shared.record_send(now).await;
        assert!(shared.volume_exceeded(now, &[]).await);

        // Old sends age out of the window
        let later = now + chrono::Duration::seconds(120);
        assert!(!shared.volume_exceeded(later, &[]).await);
    }

    #[tokio::test]
    async fn volume_rule_overrides_config_ceiling() {
        let shared = EngineShared::new(idle_config(), Arc::new(AlwaysOk), RuleRegistry::new());
        let rules = vec![
            SendingRule::new("tight_volume", ConditionType::VolumeBased, RuleAction::Batch)
                .with_condition_params(serde_json::json!({"max_per_minute": 1})),
        ];

        let now = Utc::now();
        assert!(!shared.volume_exceeded(now, &rules).await);
        shared.record_send(now).await;
        assert!(shared.volume_exceeded(now, &rules).await);
    }

    #[tokio::test]
    async fn shutdown_without_worker_is_a_noop() {
        let scheduler = ResponseScheduler::with_config(Arc::new(AlwaysOk), idle_config());
        scheduler.shutdown().await;
        assert!(!scheduler.is_worker_running().await);
    }
}
