//! Schedule parsing and due-post processing
//!
//! Schedule expressions accept:
//! - Relative durations: "30m", "2h", "1d"
//! - Natural language: "tomorrow 9am", "next monday"
//! - RFC 3339 instants: "2025-11-20T15:00:00Z"

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{CrosspostError, Result};
use crate::orchestrator::{PublishOrchestrator, PublishReport};

/// Parse a schedule expression relative to `now`.
///
/// # Errors
///
/// Returns `InvalidInput` if the expression is empty, cannot be parsed, or
/// names an instant that is not in the future.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CrosspostError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    let at = parse_duration(input)
        .map(|d| now + d)
        .or_else(|| DateTime::parse_from_rfc3339(input).ok().map(|t| t.with_timezone(&Utc)))
        .or_else(|| chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).ok())
        .ok_or_else(|| {
            CrosspostError::InvalidInput(format!("Could not parse schedule string: {}", input))
        })?;

    if at <= now {
        return Err(CrosspostError::InvalidInput(format!(
            "Scheduled time {} is in the past",
            at.to_rfc3339()
        )));
    }
    Ok(at)
}

fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::from_std(std_duration).ok()
}

/// Publish every scheduled post whose instant has passed.
///
/// Posts another caller already started are skipped, so overlapping
/// triggers and the internal poll can run together.
pub async fn publish_due(
    db: &Database,
    orchestrator: &PublishOrchestrator,
    now: i64,
) -> Result<Vec<PublishReport>> {
    let due = db.due_scheduled_posts(now).await?;
    if due.is_empty() {
        return Ok(Vec::new());
    }
    info!(count = due.len(), "Publishing due scheduled posts");

    let mut reports = Vec::with_capacity(due.len());
    for post_id in due {
        match orchestrator.publish(&post_id).await {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => warn!(post_id = %post_id, error = %e, "Failed to publish due post"),
        }
    }
    Ok(reports)
}
