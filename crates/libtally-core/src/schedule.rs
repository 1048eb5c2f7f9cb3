//! Export scheduling gate

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why an export cycle is being considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTrigger {
    /// Opportunistic, e.g. after recording an event. Subject to the interval.
    Scheduled,
    /// Explicitly requested by the user. Always runs.
    Manual,
}

/// Whether enough time has passed since the last successful export.
///
/// `interval_secs == 0` disables the gate. A missing `last_export_unix` means
/// no export ever completed. A clock that went backwards counts as not due.
pub fn should_export(now: DateTime<Utc>, last_export_unix: Option<i64>, interval_secs: u64) -> bool {
    if interval_secs == 0 {
        return true;
    }
    let Some(last) = last_export_unix else {
        return true;
    };
    let elapsed = now.timestamp().saturating_sub(last);
    elapsed >= 0 && (elapsed as u64) >= interval_secs
}

/// Gate decision for a trigger
pub fn is_due(
    trigger: ExportTrigger,
    now: DateTime<Utc>,
    last_export_unix: Option<i64>,
    interval_secs: u64,
) -> bool {
    match trigger {
        ExportTrigger::Manual => true,
        ExportTrigger::Scheduled => should_export(now, last_export_unix, interval_secs),
    }
}
