//! Shared test fixtures. Compiled only for `cfg(test)`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::types::{ActivityEvent, ActivityKind, PipelineType, Record, RecordKind, StageCategory};

/// Fixed "now" for deterministic evaluations: Friday 2026-08-07 15:00 UTC.
pub(crate) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 7, 15, 0, 0).unwrap()
}

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Minimal compliant open deal in the standard sales pipeline.
pub(crate) fn record(id: &str) -> Record {
    Record {
        id: id.to_string(),
        crm_id: None,
        kind: RecordKind::Deal,
        name: format!("Record {id}"),
        pipeline: PipelineType::StandardSales,
        stage: Some("Discovery".to_string()),
        stage_category: StageCategory::Open,
        stage_entered_at: Some(date(2026, 8, 3)),
        amount: Some(10_000.0),
        products: vec!["platform".to_string()],
        close_date: Some(date(2026, 9, 30)),
        contract_end: None,
        negative_sentiment: false,
        created_at: ts(2026, 8, 3, 9),
        last_activity_at: Some(ts(2026, 8, 6, 10)),
        next_activity_at: None,
        next_step: Some("Send recap".to_string()),
        owner: Some("sarah".to_string()),
        updated_at: fixed_now().to_rfc3339(),
        archived: false,
    }
}

pub(crate) fn touch(record_id: &str, n: u32, kind: ActivityKind, at: DateTime<Utc>) -> ActivityEvent {
    ActivityEvent {
        id: format!("{record_id}-ev{n}"),
        record_id: record_id.to_string(),
        kind,
        occurred_at: at,
    }
}
