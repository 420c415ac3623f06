//! Sending rules — named business constraints that shape delivery timing
//! and ordering.
//!
//! The registry holds the rules; the evaluator consults a snapshot of the
//! active ones on each `schedule()` call. Mutations take effect on the
//! next call and are never applied retroactively to queued items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RuleError;

/// Which constraint family a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    TimeBased,
    PriorityBased,
    VolumeBased,
    CustomerBased,
}

/// What a matched rule does to the timing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    SendImmediately,
    Delay,
    Batch,
    Escalate,
}

/// A named business rule.
///
/// Recognized `condition_params` by type:
/// - time_based: `start_hour`, `end_hour`, `timezone`, `weekdays_only`
/// - volume_based: `max_per_minute`, `batch_interval_minutes`
/// - customer_based: `customer_tier`, `priority_boost`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingRule {
    /// Unique rule ID.
    pub id: Uuid,
    /// Human-readable name, recorded on items it schedules.
    pub name: String,
    /// Constraint family.
    pub condition_type: ConditionType,
    /// Type-specific configuration.
    #[serde(default)]
    pub condition_params: serde_json::Value,
    /// Effect when the rule matches.
    pub action: RuleAction,
    /// Action-specific configuration (e.g. `delay_minutes`).
    #[serde(default)]
    pub action_params: serde_json::Value,
    /// Inactive rules are skipped by the evaluator.
    pub is_active: bool,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
}

impl SendingRule {
    /// Create an active rule with empty params.
    pub fn new(
        name: impl Into<String>,
        condition_type: ConditionType,
        action: RuleAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            condition_type,
            condition_params: serde_json::Value::Null,
            action,
            action_params: serde_json::Value::Null,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Set condition params (builder style).
    pub fn with_condition_params(mut self, params: serde_json::Value) -> Self {
        self.condition_params = params;
        self
    }

    /// Set action params (builder style).
    pub fn with_action_params(mut self, params: serde_json::Value) -> Self {
        self.action_params = params;
        self
    }

    /// Integer condition param by key.
    pub fn condition_i64(&self, key: &str) -> Option<i64> {
        self.condition_params.get(key).and_then(|v| v.as_i64())
    }

    /// Boolean condition param by key.
    pub fn condition_bool(&self, key: &str) -> Option<bool> {
        self.condition_params.get(key).and_then(|v| v.as_bool())
    }

    /// String condition param by key.
    pub fn condition_str(&self, key: &str) -> Option<&str> {
        self.condition_params.get(key).and_then(|v| v.as_str())
    }

    /// Integer action param by key.
    pub fn action_i64(&self, key: &str) -> Option<i64> {
        self.action_params.get(key).and_then(|v| v.as_i64())
    }
}

/// Partial update for a rule. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub condition_params: Option<serde_json::Value>,
    pub action: Option<RuleAction>,
    pub action_params: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// Holds the sending rules consulted at `schedule()` time.
pub struct RuleRegistry {
    rules: RwLock<Vec<SendingRule>>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Create a registry seeded with the standard rules: business hours,
    /// send-volume batching, and VIP bypass.
    pub fn default_rules() -> Self {
        let rules = vec![
            SendingRule::new("business_hours", ConditionType::TimeBased, RuleAction::Delay)
                .with_condition_params(serde_json::json!({
                    "start_hour": 9,
                    "end_hour": 17,
                    "timezone": "UTC",
                    "weekdays_only": true,
                })),
            SendingRule::new("volume_batch", ConditionType::VolumeBased, RuleAction::Batch)
                .with_condition_params(serde_json::json!({
                    "max_per_minute": 60,
                    "batch_interval_minutes": 5,
                })),
            SendingRule::new(
                "vip_bypass",
                ConditionType::CustomerBased,
                RuleAction::SendImmediately,
            )
            .with_condition_params(serde_json::json!({
                "customer_tier": "vip",
                "priority_boost": 30,
            })),
        ];

        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Add a rule. Returns its ID.
    pub async fn add(&self, rule: SendingRule) -> Uuid {
        let id = rule.id;
        info!(rule_id = %id, name = %rule.name, condition = ?rule.condition_type, "Rule added");
        self.rules.write().await.push(rule);
        id
    }

    /// Apply a partial update to a rule.
    ///
    /// Returns `RuleError::NotFound` for an unknown ID — callers must
    /// check the result, this never panics.
    pub async fn update(&self, id: Uuid, patch: RulePatch) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RuleError::NotFound { id })?;

        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(params) = patch.condition_params {
            rule.condition_params = params;
        }
        if let Some(action) = patch.action {
            rule.action = action;
        }
        if let Some(params) = patch.action_params {
            rule.action_params = params;
        }
        if let Some(active) = patch.is_active {
            rule.is_active = active;
        }

        debug!(rule_id = %id, name = %rule.name, "Rule updated");
        Ok(())
    }

    /// Snapshot of the active rules, in insertion order.
    pub async fn active(&self) -> Vec<SendingRule> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect()
    }

    /// Snapshot of all rules.
    pub async fn all(&self) -> Vec<SendingRule> {
        self.rules.read().await.clone()
    }

    /// Number of active rules.
    pub async fn active_count(&self) -> usize {
        self.rules.read().await.iter().filter(|r| r.is_active).count()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
