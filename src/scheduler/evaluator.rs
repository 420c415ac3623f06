//! Priority and timing evaluation.
//!
//! Pure functions: a composed response plus the active rules and an
//! evaluation context go in, a `(scheduled_at, priority_score)` decision
//! comes out. The chain below is evaluated top to bottom, first match
//! wins:
//!
//! 1. forced immediate (caller override)
//! 2. urgent tier bypass
//! 3. business-hours window (non-escalations only)
//! 4. send-volume batching
//! 5. VIP bypass
//! 6. immediate
//!
//! No queue or worker types appear here; the clock is injected through
//! `EvalContext` so every branch is testable with a fixed timestamp.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, Offset,
    TimeZone, Timelike, Utc, Weekday,
};
use tracing::debug;

use crate::config::BusinessHours;
use crate::response::{ComposedResponse, PriorityTier, ResponseKind};
use crate::rules::{ConditionType, RuleAction, SendingRule};

/// Inputs to a single evaluation, snapshotted by the facade.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Evaluation time.
    pub now: DateTime<Utc>,
    /// Caller asked for immediate dispatch.
    pub force_immediate: bool,
    /// The send-volume constraint is currently tripped.
    pub volume_exceeded: bool,
    /// Default window when no time-based rule is active.
    pub business_hours: BusinessHours,
    /// Default batch delay when no volume rule supplies one.
    pub batch_interval: std::time::Duration,
}

impl EvalContext {
    /// Context for an immediate evaluation at `now` with defaults.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            force_immediate: false,
            volume_exceeded: false,
            business_hours: BusinessHours::default(),
            batch_interval: std::time::Duration::from_secs(300),
        }
    }
}

/// Outcome of an evaluation.
#[derive(Debug, Clone)]
pub struct TimingDecision {
    /// Do not dispatch before this time.
    pub scheduled_at: DateTime<Utc>,
    /// Ordering score, floored at 1. Lower dispatches sooner.
    pub priority_score: i32,
    /// Name of the rule (or built-in step) that fixed the timing.
    pub applied_rule: String,
}

/// Evaluate timing and priority for one response.
pub fn evaluate(
    response: &ComposedResponse,
    rules: &[SendingRule],
    ctx: &EvalContext,
) -> TimingDecision {
    let (scheduled_at, applied_rule) = decide_timing(response, rules, ctx);
    let priority_score = compute_score(response, rules);

    debug!(
        recipient = %response.recipient,
        tier = %response.priority_tier,
        kind = %response.response_kind,
        score = priority_score,
        scheduled_at = %scheduled_at,
        rule = %applied_rule,
        "Evaluated response timing"
    );

    TimingDecision {
        scheduled_at,
        priority_score,
        applied_rule,
    }
}

fn first_active(rules: &[SendingRule], condition_type: ConditionType) -> Option<&SendingRule> {
    rules
        .iter()
        .find(|r| r.is_active && r.condition_type == condition_type)
}

fn decide_timing(
    response: &ComposedResponse,
    rules: &[SendingRule],
    ctx: &EvalContext,
) -> (DateTime<Utc>, String) {
    if ctx.force_immediate {
        return (ctx.now, "forced_immediate".into());
    }

    if response.priority_tier == PriorityTier::Urgent {
        return (ctx.now, "urgent_bypass".into());
    }

    let time_rule = first_active(rules, ConditionType::TimeBased);
    let window = resolve_window(time_rule, &ctx.business_hours);
    if response.response_kind != ResponseKind::Escalation && !in_window(ctx.now, &window) {
        let name = time_rule
            .map(|r| r.name.clone())
            .unwrap_or_else(|| "business_hours".into());

        // A delay-action rule postpones by a fixed amount instead of
        // waiting for the next window start.
        if let Some(rule) = time_rule {
            if rule.action == RuleAction::Delay {
                if let Some(minutes) = rule.action_i64("delay_minutes") {
                    return (ctx.now + ChronoDuration::minutes(minutes.max(0)), name);
                }
            }
        }

        return (next_window_start(ctx.now, &window), name);
    }

    if ctx.volume_exceeded {
        let volume_rule = first_active(rules, ConditionType::VolumeBased);
        let interval = volume_rule
            .and_then(|r| r.condition_i64("batch_interval_minutes"))
            .map(|m| ChronoDuration::minutes(m.max(0)))
            .unwrap_or_else(|| {
                ChronoDuration::from_std(ctx.batch_interval)
                    .unwrap_or_else(|_| ChronoDuration::minutes(5))
            });
        let name = volume_rule
            .map(|r| r.name.clone())
            .unwrap_or_else(|| "volume_batch".into());
        return (ctx.now + interval, name);
    }

    if response.vip_customer {
        let name = first_active(rules, ConditionType::CustomerBased)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| "vip_bypass".into());
        return (ctx.now, name);
    }

    (ctx.now, "immediate".into())
}

fn compute_score(response: &ComposedResponse, rules: &[SendingRule]) -> i32 {
    let mut score =
        response.priority_tier.base_score() + response.response_kind.score_adjustment();

    if response.vip_customer {
        let boost = first_active(rules, ConditionType::CustomerBased)
            .and_then(|r| r.condition_i64("priority_boost"))
            .unwrap_or(30);
        score -= boost as i32;
    }

    score.max(1)
}

// ── Business-hours window ───────────────────────────────────────────

struct Window {
    hours: BusinessHours,
    offset: FixedOffset,
}

fn resolve_window(time_rule: Option<&SendingRule>, defaults: &BusinessHours) -> Window {
    let mut hours = *defaults;
    let mut offset = utc_offset();

    if let Some(rule) = time_rule {
        if let Some(start) = rule.condition_i64("start_hour") {
            hours.start_hour = start.clamp(0, 23) as u32;
        }
        if let Some(end) = rule.condition_i64("end_hour") {
            hours.end_hour = end.clamp(1, 24) as u32;
        }
        if let Some(weekdays_only) = rule.condition_bool("weekdays_only") {
            hours.weekdays_only = weekdays_only;
        }
        if let Some(tz) = rule.condition_str("timezone") {
            offset = parse_offset(tz).unwrap_or_else(|| {
                debug!(timezone = %tz, "Unrecognized timezone, falling back to UTC");
                utc_offset()
            });
        }
    }

    Window { hours, offset }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Parse "UTC" or a fixed "+HH:MM" / "-HH:MM" offset.
fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") {
        return Some(utc_offset());
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn in_window(now: DateTime<Utc>, window: &Window) -> bool {
    let local = now.with_timezone(&window.offset);
    if window.hours.weekdays_only && is_weekend(local.date_naive()) {
        return false;
    }
    let hour = local.hour();
    hour >= window.hours.start_hour && hour < window.hours.end_hour
}

/// Start of the next window: same-day start if before hours, next day's
/// start if after hours, next Monday's start from a weekend.
fn next_window_start(now: DateTime<Utc>, window: &Window) -> DateTime<Utc> {
    let local = now.with_timezone(&window.offset);
    let start_hour = window.hours.start_hour.min(23);

    let mut day = local.date_naive();
    let today_usable = !(window.hours.weekdays_only && is_weekend(day));
    if !(today_usable && local.hour() < start_hour) {
        day = day.succ_opt().unwrap_or(day);
        while window.hours.weekdays_only && is_weekend(day) {
            day = day.succ_opt().unwrap_or(day);
        }
    }

    let start_time = NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    match window.offset.from_local_datetime(&day.and_time(start_time)) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        chrono::LocalResult::None => now,
    }
}
