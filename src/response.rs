//! Composed response contract — what the composition layer hands the scheduler.
//!
//! The scheduler treats the response as opaque beyond the fields it reads
//! for timing and ordering: priority tier, response kind, recipient, and
//! the VIP marker.

use serde::{Deserialize, Serialize};

/// Priority tier assigned by the composition/triage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low,
    Medium,
    High,
    Urgent,
}

impl PriorityTier {
    /// Base priority score for this tier. Lower dispatches sooner.
    pub fn base_score(&self) -> i32 {
        match self {
            Self::Urgent => 10,
            Self::High => 25,
            Self::Medium => 50,
            Self::Low => 100,
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

/// What kind of response this is, from the composition layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Acknowledgment,
    InformationRequest,
    Resolution,
    Escalation,
    FollowUp,
    Closure,
}

impl ResponseKind {
    /// Score adjustment by kind. Escalations and resolutions jump the line.
    pub fn score_adjustment(&self) -> i32 {
        match self {
            Self::Escalation => -20,
            Self::Resolution => -10,
            Self::Acknowledgment => 0,
            Self::InformationRequest => 5,
            Self::FollowUp => 10,
            Self::Closure => 15,
        }
    }
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Acknowledgment => "acknowledgment",
            Self::InformationRequest => "information_request",
            Self::Resolution => "resolution",
            Self::Escalation => "escalation",
            Self::FollowUp => "follow_up",
            Self::Closure => "closure",
        };
        write!(f, "{s}")
    }
}

/// A finished outbound response, ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedResponse {
    /// Recipient address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Priority tier for ordering and urgent bypass.
    pub priority_tier: PriorityTier,
    /// Response kind for score adjustment and escalation bypass.
    pub response_kind: ResponseKind,
    /// VIP customer marker — bypasses windowing and boosts priority.
    #[serde(default)]
    pub vip_customer: bool,
    /// Free-form metadata carried through from the composition layer.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ComposedResponse {
    /// Create a response with empty metadata.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        priority_tier: PriorityTier,
        response_kind: ResponseKind,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            priority_tier,
            response_kind,
            vip_customer: false,
            metadata: serde_json::Value::Null,
        }
    }

    /// Mark this response as addressed to a VIP customer.
    pub fn for_vip(mut self) -> Self {
        self.vip_customer = true;
        self
    }
}
