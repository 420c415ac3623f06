//! Scheduled item and its delivery state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::response::ComposedResponse;
use crate::scheduler::evaluator::TimingDecision;

/// Delivery state of a scheduled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting in the queue until `scheduled_at`.
    Scheduled,
    /// Pulled by the worker, send in flight.
    Processing,
    /// Delivered successfully.
    Sent,
    /// Retry ceiling reached.
    Failed,
    /// Cancelled before dispatch.
    Cancelled,
}

impl DeliveryStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: DeliveryStatus) -> bool {
        use DeliveryStatus::*;

        matches!(
            (self, target),
            // From Scheduled (cancellation only while still queued)
            (Scheduled, Processing) | (Scheduled, Cancelled) |
            // From Processing (Scheduled = retry re-entry)
            (Processing, Sent) | (Processing, Scheduled) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A single pending or in-flight dispatch unit wrapping a composed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledItem {
    /// Unique item ID, assigned at scheduling time.
    pub id: Uuid,
    /// The composed response to deliver.
    pub response: ComposedResponse,
    /// Do not dispatch before this time.
    pub scheduled_at: DateTime<Utc>,
    /// Ordering score — lower dispatches first. Always >= 1.
    pub priority_score: i32,
    /// Delivery attempts that have failed so far.
    pub retry_count: u32,
    /// Retry ceiling; reaching it is a one-way transition to failed.
    pub max_retries: u32,
    /// Current delivery state.
    pub status: DeliveryStatus,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// When delivery succeeded.
    pub sent_at: Option<DateTime<Utc>>,
    /// Free-form metadata; records which rule produced the timing decision.
    pub metadata: serde_json::Value,
}

impl ScheduledItem {
    /// Build an item from an evaluator decision.
    pub fn new(response: ComposedResponse, decision: &TimingDecision, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            response,
            scheduled_at: decision.scheduled_at,
            priority_score: decision.priority_score,
            retry_count: 0,
            max_retries,
            status: DeliveryStatus::Scheduled,
            created_at: Utc::now(),
            sent_at: None,
            metadata: serde_json::json!({ "applied_rule": decision.applied_rule }),
        }
    }

    /// Transition to a new status, stamping `sent_at` on success.
    pub fn transition_to(&mut self, target: DeliveryStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status, target
            ));
        }

        self.status = target;
        if target == DeliveryStatus::Sent {
            self.sent_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Whether another delivery attempt is allowed.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Exponential backoff delay for the current retry count:
    /// `2^retry_count * base`.
    pub fn backoff_delay(&self, base: std::time::Duration) -> std::time::Duration {
        base.saturating_mul(2u32.saturating_pow(self.retry_count))
    }
}
