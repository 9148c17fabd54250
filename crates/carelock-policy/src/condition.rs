//! Condition evaluation for conditional grants.
//!
//! Sub-conditions are checked in the order time, location, network. All
//! present sub-conditions must hold and the first one that fails decides the
//! outcome. A sub-condition that needs a context field the caller did not
//! supply fails closed with [`ConditionOutcome::EvaluationError`].

use std::fmt;

use carelock_core::{GrantCondition, RequestContext, TimeWindow};
use chrono::{DateTime, NaiveTime, Utc};
use tracing::warn;

/// A context field a condition can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    /// `now` could not be mapped to a calendar time.
    Time,
    Location,
    Origin,
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextField::Time => "time",
            ContextField::Location => "location_id",
            ContextField::Origin => "origin",
        })
    }
}

/// Result of checking a condition against a request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Satisfied,
    NotSatisfied { reason: String },
    EvaluationError { missing_field: ContextField },
}

impl ConditionOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ConditionOutcome::Satisfied)
    }

    fn not_satisfied(reason: impl Into<String>) -> Self {
        ConditionOutcome::NotSatisfied {
            reason: reason.into(),
        }
    }

    fn missing(field: ContextField) -> Self {
        warn!(field = %field, "condition evaluation error: required context field missing, failing closed");
        ConditionOutcome::EvaluationError {
            missing_field: field,
        }
    }
}

/// Check a grant condition against a request context.
pub fn is_satisfied(condition: &GrantCondition, context: &RequestContext) -> ConditionOutcome {
    if let Some(window) = &condition.time_window {
        match check_time(window, context.now) {
            ConditionOutcome::Satisfied => {}
            failed => return failed,
        }
    }

    if let Some(allowed) = &condition.allowed_locations {
        let Some(location) = &context.location_id else {
            return ConditionOutcome::missing(ContextField::Location);
        };
        if !allowed.contains(location) {
            return ConditionOutcome::not_satisfied(format!("location {location} is not allowed"));
        }
    }

    if let Some(networks) = &condition.allowed_origins {
        let Some(origin) = context.origin else {
            return ConditionOutcome::missing(ContextField::Origin);
        };
        if !networks.iter().any(|net| net.contains(origin)) {
            return ConditionOutcome::not_satisfied(format!("origin {origin} is not in an allowed network"));
        }
    }

    ConditionOutcome::Satisfied
}

/// Both window boundaries are inclusive.
fn check_time(window: &TimeWindow, now: i64) -> ConditionOutcome {
    match window {
        TimeWindow::Absolute { start, end } => {
            if *start <= now && now <= *end {
                ConditionOutcome::Satisfied
            } else {
                ConditionOutcome::not_satisfied(format!("time {now} is outside window {start}..={end}"))
            }
        }
        TimeWindow::Daily { start, end } => {
            let Some(at) = DateTime::<Utc>::from_timestamp_millis(now) else {
                return ConditionOutcome::missing(ContextField::Time);
            };
            let time = at.time();
            if within_daily(time, *start, *end) {
                ConditionOutcome::Satisfied
            } else {
                ConditionOutcome::not_satisfied(format!(
                    "time {} UTC is outside daily window {start}-{end}",
                    time.format("%H:%M:%S")
                ))
            }
        }
    }
}

fn within_daily(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= time && time <= end
    } else {
        // Wraps past midnight, e.g. 22:00-06:00
        time >= start || time <= end
    }
}
