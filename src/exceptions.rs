//! Exception aggregation: one pass over a record batch producing the
//! unified exception list every queue and dashboard is built from.
//!
//! Evaluation is pure over prefetched snapshots. Exceptions for a record
//! come out in the fixed type-enumeration order, and the batch output is
//! stable by input order no matter how the work is scheduled. Large
//! batches fan out across records (they share no mutable state) and are
//! collected back in order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calendar::business_days_between;
use crate::next_step::NextStepAnalysis;
use crate::types::{ActivityEvent, Record, Thresholds};

/// Batches at or above this size are evaluated in parallel.
const PARALLEL_THRESHOLD: usize = 64;

/// The fixed exception enumeration. Variant order is output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    OverdueNextStep,
    PastCloseDate,
    ActivityDrought,
    NoNextStep,
    StaleStage,
    HighValueAtRisk,
}

impl ExceptionType {
    pub const ALL: [ExceptionType; 6] = [
        ExceptionType::OverdueNextStep,
        ExceptionType::PastCloseDate,
        ExceptionType::ActivityDrought,
        ExceptionType::NoNextStep,
        ExceptionType::StaleStage,
        ExceptionType::HighValueAtRisk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionType::OverdueNextStep => "overdue_next_step",
            ExceptionType::PastCloseDate => "past_close_date",
            ExceptionType::ActivityDrought => "activity_drought",
            ExceptionType::NoNextStep => "no_next_step",
            ExceptionType::StaleStage => "stale_stage",
            ExceptionType::HighValueAtRisk => "high_value_at_risk",
        }
    }
}

/// Severity ranks sort most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Fixed severity table. Overdue next steps and past close dates on
/// high-value deals are always critical.
fn severity_for(exception_type: ExceptionType, high_value: bool) -> Severity {
    match exception_type {
        ExceptionType::OverdueNextStep | ExceptionType::PastCloseDate => {
            if high_value {
                Severity::Critical
            } else {
                Severity::High
            }
        }
        ExceptionType::ActivityDrought => Severity::Medium,
        ExceptionType::NoNextStep => Severity::Medium,
        ExceptionType::StaleStage => Severity::Low,
        ExceptionType::HighValueAtRisk => Severity::Critical,
    }
}

/// One detected policy violation. Derived fresh on every run, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    pub record_id: String,
    pub exception_type: ExceptionType,
    pub severity: Severity,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
}

/// Everything the aggregator needs about one record, prefetched so the
/// evaluators themselves never touch I/O.
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub record: Record,
    pub next_step: Option<NextStepAnalysis>,
    pub activity: Option<Vec<ActivityEvent>>,
}

/// Batch output: the full exception list plus counts by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionReport {
    pub exceptions: Vec<Exception>,
    pub counts: BTreeMap<ExceptionType, usize>,
    pub records_evaluated: usize,
    pub generated_at: DateTime<Utc>,
}

/// Run every check against one record. Closed and archived records cannot
/// be in violation.
pub fn evaluate_record(
    input: &EvaluationInput,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Vec<Exception> {
    let record = &input.record;
    if record.archived || record.stage_category.is_closed() {
        return Vec::new();
    }

    let today = now.date_naive();
    let high_value = record
        .amount
        .map(|a| a >= thresholds.high_value_amount)
        .unwrap_or(false);

    let mut exceptions = Vec::new();
    let push = |exceptions: &mut Vec<Exception>, exception_type, detail: String| {
        exceptions.push(Exception {
            record_id: record.id.clone(),
            exception_type,
            severity: severity_for(exception_type, high_value),
            detail,
            detected_at: now,
        });
    };

    // overdue_next_step
    if let Some(analysis) = &input.next_step {
        if analysis.is_overdue(today) {
            let due = analysis.due_date.expect("overdue implies a due date");
            push(
                &mut exceptions,
                ExceptionType::OverdueNextStep,
                format!("Next step was due {due}"),
            );
        }
    }

    // past_close_date
    if let Some(close) = record.close_date {
        if close < today {
            push(
                &mut exceptions,
                ExceptionType::PastCloseDate,
                format!("Close date {close} has passed"),
            );
        }
    }

    // activity_drought. A record never touched since creation dries out on
    // the same clock
    let idle_since = record
        .last_activity_at
        .unwrap_or(record.created_at)
        .date_naive();
    let idle_days = business_days_between(idle_since, today);
    if idle_days > thresholds.activity_drought_days {
        push(
            &mut exceptions,
            ExceptionType::ActivityDrought,
            format!("No activity in {idle_days} business days"),
        );
    }

    // no_next_step
    if record.next_step_text().is_none() {
        push(
            &mut exceptions,
            ExceptionType::NoNextStep,
            "No next step recorded".to_string(),
        );
    }

    // stale_stage
    if let Some(entered) = record.stage_entered_at {
        let stage_days = business_days_between(entered, today);
        if stage_days > thresholds.stale_stage_days {
            let stage = record.stage.as_deref().unwrap_or("current stage");
            push(
                &mut exceptions,
                ExceptionType::StaleStage,
                format!("In {stage} for {stage_days} business days"),
            );
        }
    }

    // high_value_at_risk: amount over threshold AND anything else wrong
    if high_value && !exceptions.is_empty() {
        let amount = record.amount.unwrap_or(0.0);
        let detail = format!(
            "${amount:.0} at risk with {} other exception(s)",
            exceptions.len()
        );
        push(&mut exceptions, ExceptionType::HighValueAtRisk, detail);
    }

    exceptions
}

/// Evaluate a batch. Output order is input order; each record's exceptions
/// keep the fixed type order.
pub fn aggregate(
    inputs: &[EvaluationInput],
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> ExceptionReport {
    let per_record: Vec<Vec<Exception>> = if inputs.len() >= PARALLEL_THRESHOLD {
        inputs
            .par_iter()
            .map(|input| evaluate_record(input, now, thresholds))
            .collect()
    } else {
        inputs
            .iter()
            .map(|input| evaluate_record(input, now, thresholds))
            .collect()
    };

    let exceptions: Vec<Exception> = per_record.into_iter().flatten().collect();

    let mut counts: BTreeMap<ExceptionType, usize> = BTreeMap::new();
    for exception in &exceptions {
        *counts.entry(exception.exception_type).or_insert(0) += 1;
    }

    ExceptionReport {
        exceptions,
        counts,
        records_evaluated: inputs.len(),
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::next_step::{fingerprint, NextStepStatus};
    use crate::testutil::{self, date, fixed_now, ts};
    use crate::types::StageCategory;

    fn input(record: Record) -> EvaluationInput {
        EvaluationInput {
            record,
            next_step: None,
            activity: None,
        }
    }

    fn overdue_analysis() -> NextStepAnalysis {
        NextStepAnalysis {
            status: NextStepStatus::DateFound,
            due_date: Some(date(2026, 8, 3)),
            confidence: Some(0.95),
            analyzed_at: fixed_now(),
            text_fingerprint: fingerprint("follow up 2026-08-03"),
        }
    }

    #[test]
    fn test_healthy_record_has_no_exceptions() {
        let exceptions = evaluate_record(
            &input(testutil::record("r1")),
            fixed_now(),
            &Thresholds::default(),
        );
        assert!(exceptions.is_empty());
    }

    #[test]
    fn test_closed_and_archived_records_skipped() {
        let mut won = testutil::record("r1");
        won.stage_category = StageCategory::ClosedWon;
        won.close_date = Some(date(2026, 1, 1));
        won.next_step = None;
        assert!(evaluate_record(&input(won), fixed_now(), &Thresholds::default()).is_empty());

        let mut archived = testutil::record("r2");
        archived.archived = true;
        archived.next_step = None;
        assert!(evaluate_record(&input(archived), fixed_now(), &Thresholds::default()).is_empty());
    }

    #[test]
    fn test_past_close_date() {
        let mut record = testutil::record("r1");
        record.close_date = Some(date(2026, 8, 6));

        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].exception_type, ExceptionType::PastCloseDate);
        assert_eq!(exceptions[0].severity, Severity::High);
        assert!(exceptions[0].detail.contains("2026-08-06"));
    }

    #[test]
    fn test_overdue_next_step_from_analysis() {
        let mut eval = input(testutil::record("r1"));
        eval.next_step = Some(overdue_analysis());

        let exceptions = evaluate_record(&eval, fixed_now(), &Thresholds::default());
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].exception_type, ExceptionType::OverdueNextStep);
    }

    #[test]
    fn test_awaiting_external_not_overdue() {
        let mut eval = input(testutil::record("r1"));
        let mut analysis = overdue_analysis();
        analysis.status = NextStepStatus::AwaitingExternal;
        eval.next_step = Some(analysis);

        let exceptions = evaluate_record(&eval, fixed_now(), &Thresholds::default());
        assert!(exceptions.is_empty());
    }

    #[test]
    fn test_activity_drought_and_never_touched() {
        let mut record = testutil::record("r1");
        record.last_activity_at = Some(ts(2026, 7, 1, 9));
        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        assert_eq!(exceptions[0].exception_type, ExceptionType::ActivityDrought);

        // No activity ever: the creation date starts the clock
        let mut record = testutil::record("r2");
        record.created_at = ts(2026, 7, 1, 9);
        record.last_activity_at = None;
        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        assert_eq!(exceptions[0].exception_type, ExceptionType::ActivityDrought);
    }

    #[test]
    fn test_stale_stage_strictly_over_threshold() {
        let thresholds = Thresholds::default();

        // Exactly at the threshold: not stale. 15 business days before
        // Fri 2026-08-07 is Fri 2026-07-17.
        let mut record = testutil::record("r1");
        record.stage_entered_at = Some(date(2026, 7, 17));
        assert!(evaluate_record(&input(record), fixed_now(), &thresholds).is_empty());

        let mut record = testutil::record("r2");
        record.stage_entered_at = Some(date(2026, 7, 16));
        let exceptions = evaluate_record(&input(record), fixed_now(), &thresholds);
        assert_eq!(exceptions[0].exception_type, ExceptionType::StaleStage);
        assert_eq!(exceptions[0].severity, Severity::Low);
    }

    #[test]
    fn test_no_next_step() {
        let mut record = testutil::record("r1");
        record.next_step = None;
        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        assert_eq!(exceptions[0].exception_type, ExceptionType::NoNextStep);
        assert_eq!(exceptions[0].severity, Severity::Medium);
    }

    #[test]
    fn test_high_value_promotes_to_critical() {
        let mut record = testutil::record("r1");
        record.amount = Some(80_000.0);
        record.close_date = Some(date(2026, 8, 1));

        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        assert_eq!(exceptions[0].exception_type, ExceptionType::PastCloseDate);
        assert_eq!(exceptions[0].severity, Severity::Critical);

        // And the record additionally flags high_value_at_risk
        let last = exceptions.last().unwrap();
        assert_eq!(last.exception_type, ExceptionType::HighValueAtRisk);
        assert_eq!(last.severity, Severity::Critical);
    }

    #[test]
    fn test_high_value_alone_is_not_at_risk() {
        let mut record = testutil::record("r1");
        record.amount = Some(500_000.0);
        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        assert!(exceptions.is_empty());
    }

    #[test]
    fn test_exceptions_follow_fixed_type_order() {
        let mut record = testutil::record("r1");
        record.amount = Some(80_000.0);
        record.close_date = Some(date(2026, 8, 1));
        record.next_step = None;
        record.last_activity_at = Some(ts(2026, 7, 1, 9));
        record.stage_entered_at = Some(date(2026, 6, 1));

        let exceptions =
            evaluate_record(&input(record), fixed_now(), &Thresholds::default());
        let types: Vec<ExceptionType> =
            exceptions.iter().map(|e| e.exception_type).collect();
        assert_eq!(
            types,
            vec![
                ExceptionType::PastCloseDate,
                ExceptionType::ActivityDrought,
                ExceptionType::NoNextStep,
                ExceptionType::StaleStage,
                ExceptionType::HighValueAtRisk,
            ]
        );
    }

    #[test]
    fn test_aggregate_counts_and_order() {
        let mut bad = testutil::record("bad");
        bad.close_date = Some(date(2026, 8, 1));

        let inputs = vec![
            input(testutil::record("ok")),
            input(bad),
            input(testutil::record("fine")),
        ];
        let report = aggregate(&inputs, fixed_now(), &Thresholds::default());

        assert_eq!(report.records_evaluated, 3);
        assert_eq!(report.exceptions.len(), 1);
        assert_eq!(report.exceptions[0].record_id, "bad");
        assert_eq!(report.counts[&ExceptionType::PastCloseDate], 1);
        assert_eq!(
            report.counts.values().sum::<usize>(),
            report.exceptions.len()
        );
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let inputs: Vec<EvaluationInput> = (0..10)
            .map(|i| {
                let mut record = testutil::record(&format!("r{i}"));
                if i % 2 == 0 {
                    record.next_step = None;
                }
                input(record)
            })
            .collect();

        let a = aggregate(&inputs, fixed_now(), &Thresholds::default());
        let b = aggregate(&inputs, fixed_now(), &Thresholds::default());
        let ids_a: Vec<&str> = a.exceptions.iter().map(|e| e.record_id.as_str()).collect();
        let ids_b: Vec<&str> = b.exceptions.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_large_batch_preserves_input_order() {
        // Past the parallel threshold, output must still follow input order
        let inputs: Vec<EvaluationInput> = (0..200)
            .map(|i| {
                let mut record = testutil::record(&format!("r{i:03}"));
                record.next_step = None;
                input(record)
            })
            .collect();

        let report = aggregate(&inputs, fixed_now(), &Thresholds::default());
        assert_eq!(report.exceptions.len(), 200);
        let ids: Vec<&str> = report
            .exceptions
            .iter()
            .map(|e| e.record_id.as_str())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_zero_exceptions_still_reports_evaluated_count() {
        let inputs = vec![input(testutil::record("r1"))];
        let report = aggregate(&inputs, fixed_now(), &Thresholds::default());
        assert!(report.exceptions.is_empty());
        assert_eq!(report.records_evaluated, 1);
    }
}
