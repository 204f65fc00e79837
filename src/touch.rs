//! Touch compliance: outreach cadence inside the post-creation window.
//!
//! The window is the first N business days after a record is created
//! (default 5). Only calls and outbound emails count. While the window is
//! open the record is judged against a linear pro-rated expectation and can
//! be at worst `behind`; `critical` is only possible once the window has
//! closed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{add_business_days, business_days_between};
use crate::types::ActivityEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchStatus {
    /// Activity data has not been fetched for this record, distinct from
    /// "fetched and zero touches".
    Pending,
    OnTrack,
    Behind,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchCounts {
    pub calls: u32,
    pub emails: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchWindowAnalysis {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub touches: TouchCounts,
    pub target: u32,
    pub gap: u32,
    pub status: TouchStatus,
}

/// Expected touches by `elapsed` business days into the window, linearly
/// pro-rated and floored: one business day into a 6-target 5-day window
/// expects 1, not 2.
fn pro_rated_expectation(target: u32, elapsed: i64, window_days: u32) -> u32 {
    if window_days == 0 {
        return target;
    }
    let elapsed = elapsed.clamp(0, window_days as i64) as u32;
    target * elapsed / window_days
}

/// Measure outreach inside the post-creation window.
///
/// `activity: None` means the record's activity has not been loaded yet and
/// yields `Pending`; an empty slice is a real zero.
pub fn analyze(
    activity: Option<&[ActivityEvent]>,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    target: u32,
    window_days: u32,
) -> TouchWindowAnalysis {
    let window_start = created_at.date_naive();
    let window_end = add_business_days(window_start, window_days);

    let Some(events) = activity else {
        return TouchWindowAnalysis {
            window_start,
            window_end,
            touches: TouchCounts::default(),
            target,
            gap: target,
            status: TouchStatus::Pending,
        };
    };

    let mut touches = TouchCounts::default();
    for event in events {
        if !event.kind.is_touch() {
            continue;
        }
        if event.occurred_at < created_at || event.occurred_at.date_naive() > window_end {
            continue;
        }
        match event.kind {
            crate::types::ActivityKind::Call => touches.calls += 1,
            _ => touches.emails += 1,
        }
        touches.total += 1;
    }

    let gap = target.saturating_sub(touches.total);
    let today = now.date_naive();

    let status = if today < window_end {
        // Window still open: judged against the pro-rated expectation,
        // never critical
        let elapsed = business_days_between(window_start, today);
        if touches.total >= pro_rated_expectation(target, elapsed, window_days) {
            TouchStatus::OnTrack
        } else {
            TouchStatus::Behind
        }
    } else if gap == 0 {
        TouchStatus::OnTrack
    } else if gap >= target.div_ceil(2) {
        TouchStatus::Critical
    } else {
        TouchStatus::Behind
    };

    TouchWindowAnalysis {
        window_start,
        window_end,
        touches,
        target,
        gap,
        status,
    }
}
