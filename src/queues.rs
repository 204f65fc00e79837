//! Presentation payloads for queue and dashboard endpoints.
//!
//! Everything here is a serialization shape over engine output; no rules
//! live in this module.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::current_quarter_bounds;
use crate::commitment::{CommitmentState, CommitmentView};
use crate::exceptions::{Exception, ExceptionReport, ExceptionType};
use crate::hygiene::MissingField;
use crate::touch::TouchWindowAnalysis;
use crate::types::{PipelineType, Record};

/// One row in the hygiene queue: what's missing on a record, whether the
/// existing external reminder covers it, and the commitment standing
/// against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HygieneQueueEntry {
    pub record_id: String,
    pub record_name: String,
    pub pipeline: PipelineType,
    pub missing_fields: Vec<MissingField>,
    pub covers_all: bool,
    pub commitment: Option<CommitmentView>,
}

/// Outreach cadence for a recently created record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutreachEntry {
    pub record_id: String,
    pub record_name: String,
    pub touch: TouchWindowAnalysis,
}

/// Headline numbers for the summary dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub exception_counts: BTreeMap<ExceptionType, usize>,
    pub total_exceptions: usize,
    pub records_evaluated: usize,
    pub hygiene_queue_size: usize,
    pub commitments_escalated: usize,
    pub closing_this_quarter: usize,
}

/// Exceptions ordered for queue display: most severe first, input order
/// preserved within a severity.
pub fn sorted_by_severity(exceptions: &[Exception]) -> Vec<Exception> {
    let mut sorted = exceptions.to_vec();
    sorted.sort_by_key(|e| e.severity);
    sorted
}

/// Build the dashboard summary from one scan's output.
pub fn build_summary(
    records: &[Record],
    report: &ExceptionReport,
    hygiene_queue: &[HygieneQueueEntry],
    commitments: &[CommitmentView],
    today: NaiveDate,
) -> QueueSummary {
    let (quarter_start, quarter_end) = current_quarter_bounds(today);
    let closing_this_quarter = records
        .iter()
        .filter(|r| !r.archived && !r.stage_category.is_closed())
        .filter(|r| {
            r.close_date
                .map(|close| close >= quarter_start && close <= quarter_end)
                .unwrap_or(false)
        })
        .count();

    QueueSummary {
        exception_counts: report.counts.clone(),
        total_exceptions: report.exceptions.len(),
        records_evaluated: report.records_evaluated,
        hygiene_queue_size: hygiene_queue.len(),
        commitments_escalated: commitments
            .iter()
            .filter(|c| c.state == CommitmentState::Escalated)
            .count(),
        closing_this_quarter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::{aggregate, EvaluationInput, Severity};
    use crate::testutil::{self, date, fixed_now};
    use crate::types::{StageCategory, Thresholds};

    fn input(record: Record) -> EvaluationInput {
        EvaluationInput {
            record,
            next_step: None,
            activity: None,
        }
    }

    #[test]
    fn test_sorted_by_severity_is_stable() {
        let mut low = testutil::record("low");
        low.stage_entered_at = Some(date(2026, 6, 1)); // stale stage → Low

        let mut critical = testutil::record("critical");
        critical.amount = Some(90_000.0);
        critical.close_date = Some(date(2026, 8, 1)); // past close, high value → Critical

        let report = aggregate(
            &[input(low), input(critical)],
            fixed_now(),
            &Thresholds::default(),
        );
        let sorted = sorted_by_severity(&report.exceptions);

        assert_eq!(sorted.first().unwrap().severity, Severity::Critical);
        assert_eq!(sorted.last().unwrap().severity, Severity::Low);
    }

    #[test]
    fn test_summary_counts_closing_this_quarter() {
        // Today 2026-08-07 → Q3: Jul 1 – Sep 30
        let mut in_quarter = testutil::record("q3");
        in_quarter.close_date = Some(date(2026, 9, 15));

        let mut next_quarter = testutil::record("q4");
        next_quarter.close_date = Some(date(2026, 10, 2));

        let mut closed = testutil::record("won");
        closed.close_date = Some(date(2026, 8, 20));
        closed.stage_category = StageCategory::ClosedWon;

        let records = vec![in_quarter, next_quarter, closed];
        let report = aggregate(
            &records.iter().cloned().map(input).collect::<Vec<_>>(),
            fixed_now(),
            &Thresholds::default(),
        );

        let summary = build_summary(&records, &report, &[], &[], date(2026, 8, 7));
        assert_eq!(summary.closing_this_quarter, 1);
        assert_eq!(summary.records_evaluated, 3);
    }

    #[test]
    fn test_summary_escalated_count() {
        let commitments = vec![
            CommitmentView {
                record_id: "a".to_string(),
                state: CommitmentState::Escalated,
                due_date: Some(date(2026, 8, 1)),
                days_remaining: Some(-4),
            },
            CommitmentView {
                record_id: "b".to_string(),
                state: CommitmentState::Pending,
                due_date: Some(date(2026, 8, 20)),
                days_remaining: Some(9),
            },
        ];

        let report = aggregate(&[], fixed_now(), &Thresholds::default());
        let summary = build_summary(&[], &report, &[], &commitments, date(2026, 8, 7));
        assert_eq!(summary.commitments_escalated, 1);
        assert_eq!(summary.total_exceptions, 0);
    }
}
