//! Triage scan orchestration: run every evaluator over the active record
//! set, reconcile commitments, create external reminders, produce the
//! report and queue payloads.
//!
//! Background loop: runs 30s after startup, then every scan interval
//! (4 hours by default). One scan is a single pass: refresh stale
//! next-step analyses, aggregate exceptions, then walk hygiene state per
//! record. A scan either completes with a report (possibly all-clean) or
//! fails loudly; a failure is never representable as an empty report.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::commitment::{CommitmentState, CommitmentView};
use crate::db::{RecordFilter, TriageDb};
use crate::error::TriageError;
use crate::exceptions::{aggregate, EvaluationInput, ExceptionReport, ExceptionType};
use crate::hygiene;
use crate::next_step::{self, DateExtractor, RegexDateExtractor};
use crate::queues::{HygieneQueueEntry, OutreachEntry};
use crate::task_dedup::{
    ensure_task, should_create, LoggingTaskSink, TaskMetadata, TaskOutcome, TaskSink,
};
use crate::types::Config;

/// How long to wait after startup before the first scan.
pub const STARTUP_DELAY_SECS: u64 = 30;

/// Summary of one triage scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageReport {
    pub records_evaluated: usize,
    pub exception_counts: BTreeMap<ExceptionType, usize>,
    pub commitments_opened: usize,
    pub commitments_cleared: usize,
    pub commitments_escalated: usize,
    pub tasks_created: usize,
    pub tasks_skipped: usize,
    pub analyses_refreshed: usize,
    pub analysis_failures: usize,
    pub touch_behind: usize,
    pub touch_critical: usize,
    pub scanned_at: String,
}

/// Full scan output: the report plus everything the queue and dashboard
/// endpoints render.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageOutcome {
    pub report: TriageReport,
    pub exceptions: ExceptionReport,
    pub hygiene_queue: Vec<HygieneQueueEntry>,
    pub outreach: Vec<OutreachEntry>,
    pub commitments: Vec<CommitmentView>,
}

/// Run one full triage scan over the active record set.
pub fn run_triage_scan(
    db: &TriageDb,
    sink: &dyn TaskSink,
    extractor: &dyn DateExtractor,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<TriageOutcome, TriageError> {
    let thresholds = &config.thresholds;
    let today = now.date_naive();

    let records = db.fetch_records(&RecordFilter::default())?;

    let mut report = TriageReport {
        records_evaluated: records.len(),
        scanned_at: now.to_rfc3339(),
        ..Default::default()
    };

    // --- Phase 1: refresh stale next-step analyses ---
    let mut inputs = Vec::with_capacity(records.len());
    for record in records {
        let prior = db.get_next_step_analysis(&record.id)?;
        let stale = next_step::needs_analysis(
            record.next_step_text(),
            prior.as_ref(),
            now,
            thresholds.next_step_freshness_days,
        );

        let analysis = if stale {
            match next_step::analyze(record.next_step_text(), extractor, now) {
                Ok(fresh) => {
                    db.write_next_step_analysis(&record.id, &fresh)?;
                    report.analyses_refreshed += 1;
                    Some(fresh)
                }
                Err(e) => {
                    // Extraction failed: the prior analysis stands untouched
                    // and the record stays flagged for re-analysis.
                    log::warn!("TriageScan: date extraction failed for {}: {}", record.id, e);
                    report.analysis_failures += 1;
                    prior
                }
            }
        } else {
            prior
        };

        let activity = db.fetch_activity(&record.id)?;
        inputs.push(EvaluationInput {
            record,
            next_step: analysis,
            activity: Some(activity),
        });
    }

    // --- Phase 2: aggregate exceptions ---
    let exceptions = aggregate(&inputs, now, thresholds);
    report.exception_counts = exceptions.counts.clone();

    // --- Phase 2b: outreach cadence for recently created records ---
    // Reviewed while the touch window is open and for a window's length
    // after it closes; older records have aged out of cadence review.
    let review_horizon = (thresholds.touch_window_days as i64) * 2;
    let mut outreach = Vec::new();
    for input in &inputs {
        let record = &input.record;
        if record.archived || record.stage_category.is_closed() {
            continue;
        }
        let age = crate::calendar::business_days_between(record.created_at.date_naive(), today);
        if age > review_horizon {
            continue;
        }

        let analysis = crate::touch::analyze(
            input.activity.as_deref(),
            record.created_at,
            now,
            thresholds.touch_target,
            thresholds.touch_window_days,
        );
        match analysis.status {
            crate::touch::TouchStatus::Behind => report.touch_behind += 1,
            crate::touch::TouchStatus::Critical => report.touch_critical += 1,
            _ => {}
        }
        outreach.push(OutreachEntry {
            record_id: record.id.clone(),
            record_name: record.name.clone(),
            touch: analysis,
        });
    }

    // --- Phase 3: reconcile commitments + external reminders ---
    let mut hygiene_queue = Vec::new();
    for input in &inputs {
        let record = &input.record;

        if record.archived || record.stage_category.is_closed() {
            if db.clear_commitment(&record.id)? {
                report.commitments_cleared += 1;
            }
            continue;
        }

        let eval = hygiene::evaluate_record(record);
        if eval.is_compliant {
            // Violation cleared; absence from the set is the resolution
            if db.clear_commitment(&record.id)? {
                report.commitments_cleared += 1;
            }
            continue;
        }

        if db.open_commitment(&record.id)? {
            report.commitments_opened += 1;
        }

        let signature = eval.signature();
        let covers_all = if config.suppress_tasks {
            let existing = db.fetch_existing_task(&record.id)?;
            should_create(existing.as_ref(), &signature, false).covers_all
        } else {
            let metadata = TaskMetadata {
                record_name: record.name.clone(),
                detail: format!(
                    "Fill in: {}",
                    signature.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            };
            match ensure_task(db, sink, &record.id, &signature, &metadata, false)? {
                TaskOutcome::Created { .. } => {
                    report.tasks_created += 1;
                    true
                }
                TaskOutcome::Skipped { covers_all } => {
                    report.tasks_skipped += 1;
                    covers_all
                }
            }
        };

        let commitment = db.get_commitment(&record.id)?.map(|c| c.view(today));
        if commitment
            .as_ref()
            .is_some_and(|view| view.state == CommitmentState::Escalated)
        {
            report.commitments_escalated += 1;
        }

        hygiene_queue.push(HygieneQueueEntry {
            record_id: record.id.clone(),
            record_name: record.name.clone(),
            pipeline: record.pipeline,
            missing_fields: eval.missing_fields,
            covers_all,
            commitment,
        });
    }

    let commitments: Vec<CommitmentView> = db
        .list_commitments()?
        .iter()
        .map(|c| c.view(today))
        .collect();

    Ok(TriageOutcome {
        report,
        exceptions,
        hygiene_queue,
        outreach,
        commitments,
    })
}

/// Shared handle to the most recent scan report.
#[derive(Default)]
pub struct ScanState {
    last_report: Mutex<Option<TriageReport>>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_report(&self) -> Option<TriageReport> {
        self.last_report.lock().clone()
    }

    pub fn store(&self, report: TriageReport) {
        *self.last_report.lock() = Some(report);
    }
}

/// Background loop: scan on startup (after a short delay), then every
/// configured interval.
pub async fn run_triage_loop(state: Arc<ScanState>, config: Config) {
    tokio::time::sleep(std::time::Duration::from_secs(STARTUP_DELAY_SECS)).await;

    log::info!("TriageLoop: started");

    loop {
        if let Some(report) = try_run_scan(&config) {
            let total_exceptions: usize = report.exception_counts.values().sum();
            if total_exceptions > 0 || report.tasks_created > 0 {
                log::info!(
                    "TriageLoop: {} records, {} exceptions \
                     (commitments opened={}, cleared={}, escalated={}; \
                     tasks created={}, skipped={})",
                    report.records_evaluated,
                    total_exceptions,
                    report.commitments_opened,
                    report.commitments_cleared,
                    report.commitments_escalated,
                    report.tasks_created,
                    report.tasks_skipped,
                );
            } else {
                log::debug!("TriageLoop: clean, no exceptions detected");
            }
            state.store(report);
        }

        tokio::time::sleep(std::time::Duration::from_secs(config.scan_interval_secs)).await;
    }
}

/// One scan attempt with its own DB connection; failures are logged, not
/// swallowed into an empty report.
fn try_run_scan(config: &Config) -> Option<TriageReport> {
    let db = match TriageDb::open() {
        Ok(db) => db,
        Err(e) => {
            log::error!("TriageLoop: cannot open store: {e}");
            return None;
        }
    };

    let now = Utc::now();
    let extractor = RegexDateExtractor::new(now.date_naive());
    match run_triage_scan(&db, &LoggingTaskSink, &extractor, config, now) {
        Ok(outcome) => Some(outcome.report),
        Err(e) => {
            log::error!("TriageLoop: scan failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::commitment::set_commitment;
    use crate::db::test_db;
    use crate::error::TriageError;
    use crate::next_step::DateExtraction;
    use crate::testutil::{self, date, fixed_now};
    use crate::touch::TouchStatus;
    use crate::types::{ActivityKind, PipelineType};

    /// Sink that remembers what it was asked to create.
    #[derive(Default)]
    struct RecordingSink {
        created: Mutex<Vec<(String, BTreeSet<String>)>>,
    }

    impl TaskSink for RecordingSink {
        fn create_task(
            &self,
            record_id: &str,
            signature: &BTreeSet<String>,
            _metadata: &TaskMetadata,
        ) -> Result<String, TriageError> {
            self.created
                .lock()
                .push((record_id.to_string(), signature.clone()));
            Ok(format!("task-{}", self.created.lock().len()))
        }
    }

    struct FailingExtractor;

    impl DateExtractor for FailingExtractor {
        fn extract(&self, _text: &str) -> Result<DateExtraction, TriageError> {
            Err(TriageError::DateExtraction("service down".to_string()))
        }
    }

    fn extractor() -> RegexDateExtractor {
        RegexDateExtractor::new(date(2026, 8, 7))
    }

    fn scan(db: &TriageDb, sink: &dyn TaskSink) -> TriageOutcome {
        run_triage_scan(db, sink, &extractor(), &Config::default(), fixed_now()).unwrap()
    }

    /// Upsell deal missing its amount: one hygiene violation.
    fn seed_violating_record(db: &TriageDb, id: &str) {
        let mut record = testutil::record(id);
        record.pipeline = PipelineType::Upsell;
        record.amount = None;
        db.upsert_record(&record).unwrap();
    }

    #[test]
    fn test_empty_store_scans_clean() {
        let db = test_db();
        let outcome = scan(&db, &RecordingSink::default());
        assert_eq!(outcome.report.records_evaluated, 0);
        assert!(outcome.exceptions.exceptions.is_empty());
        assert!(outcome.hygiene_queue.is_empty());
        assert!(!outcome.report.scanned_at.is_empty());
    }

    #[test]
    fn test_violation_opens_commitment_and_creates_task() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        let outcome = scan(&db, &sink);

        assert_eq!(outcome.report.commitments_opened, 1);
        assert_eq!(outcome.report.tasks_created, 1);

        let entry = &outcome.hygiene_queue[0];
        assert_eq!(entry.record_id, "r1");
        assert_eq!(entry.missing_fields.len(), 1);
        assert_eq!(entry.missing_fields[0].label, "Amount");
        assert!(entry.covers_all);
        assert_eq!(
            entry.commitment.as_ref().unwrap().state,
            CommitmentState::NeedsCommitment
        );

        let created = sink.created.lock();
        assert_eq!(created.len(), 1);
        assert!(created[0].1.contains("Amount"));
    }

    #[test]
    fn test_second_scan_skips_covered_task() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        scan(&db, &sink);
        let second = scan(&db, &sink);

        assert_eq!(second.report.commitments_opened, 0);
        assert_eq!(second.report.tasks_created, 0);
        assert_eq!(second.report.tasks_skipped, 1);
        assert_eq!(sink.created.lock().len(), 1);
    }

    #[test]
    fn test_new_issue_supersedes_task() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        scan(&db, &sink);

        // The close date disappears too, so the issue set grows
        let mut record = testutil::record("r1");
        record.pipeline = PipelineType::Upsell;
        record.amount = None;
        record.close_date = None;
        db.upsert_record(&record).unwrap();

        let outcome = scan(&db, &sink);
        assert_eq!(outcome.report.tasks_created, 1);

        let created = sink.created.lock();
        assert_eq!(created.len(), 2);
        assert!(created[1].1.contains("Close Date"));
    }

    #[test]
    fn test_fixed_violation_clears_commitment() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        scan(&db, &sink);

        // The owner fills in the amount
        let mut record = testutil::record("r1");
        record.pipeline = PipelineType::Upsell;
        db.upsert_record(&record).unwrap();

        let outcome = scan(&db, &sink);
        assert_eq!(outcome.report.commitments_cleared, 1);
        assert!(outcome.hygiene_queue.is_empty());
        assert!(db.get_commitment("r1").unwrap().is_none());
    }

    #[test]
    fn test_escalated_commitment_counted() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        scan(&db, &sink);

        // Commit to fixing it, then blow the date
        set_commitment(&db, "r1", date(2026, 8, 14), date(2026, 8, 7)).unwrap();
        let later = testutil::ts(2026, 8, 21, 9);
        let outcome =
            run_triage_scan(&db, &sink, &extractor(), &Config::default(), later).unwrap();

        assert_eq!(outcome.report.commitments_escalated, 1);
        let entry = &outcome.hygiene_queue[0];
        let view = entry.commitment.as_ref().unwrap();
        assert_eq!(view.state, CommitmentState::Escalated);
        assert_eq!(view.days_remaining, Some(-5));
    }

    #[test]
    fn test_extraction_failure_is_counted_not_fatal() {
        let db = test_db();
        db.upsert_record(&testutil::record("r1")).unwrap();

        let outcome = run_triage_scan(
            &db,
            &RecordingSink::default(),
            &FailingExtractor,
            &Config::default(),
            fixed_now(),
        )
        .unwrap();

        assert_eq!(outcome.report.analysis_failures, 1);
        assert_eq!(outcome.report.analyses_refreshed, 0);
        // No stored analysis: the record stays flagged for re-analysis
        assert!(db.get_next_step_analysis("r1").unwrap().is_none());
    }

    #[test]
    fn test_analysis_reused_while_fresh() {
        let db = test_db();
        db.upsert_record(&testutil::record("r1")).unwrap();

        let sink = RecordingSink::default();
        let first = scan(&db, &sink);
        assert_eq!(first.report.analyses_refreshed, 1);

        let second = scan(&db, &sink);
        assert_eq!(second.report.analyses_refreshed, 0);
    }

    #[test]
    fn test_overdue_next_step_flows_into_exceptions() {
        let db = test_db();
        let mut record = testutil::record("r1");
        record.next_step = Some("Send contract by 2026-08-03".to_string());
        db.upsert_record(&record).unwrap();

        let outcome = scan(&db, &RecordingSink::default());
        assert_eq!(
            outcome.exceptions.counts[&ExceptionType::OverdueNextStep],
            1
        );
    }

    #[test]
    fn test_suppress_tasks_config() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        let config = Config {
            suppress_tasks: true,
            ..Default::default()
        };
        let outcome =
            run_triage_scan(&db, &sink, &extractor(), &config, fixed_now()).unwrap();

        assert_eq!(outcome.report.tasks_created, 0);
        assert!(sink.created.lock().is_empty());
        // Still tracked as a violation
        assert_eq!(outcome.report.commitments_opened, 1);
        assert!(!outcome.hygiene_queue[0].covers_all);
    }

    #[test]
    fn test_outreach_reviews_young_records_only() {
        let db = test_db();
        // Created Mon 2026-08-03, window still open on Fri 2026-08-07
        db.upsert_record(&testutil::record("young")).unwrap();
        // Created long ago, aged out of cadence review
        let mut old = testutil::record("old");
        old.created_at = testutil::ts(2026, 6, 1, 9);
        db.upsert_record(&old).unwrap();

        let outcome = scan(&db, &RecordingSink::default());
        assert_eq!(outcome.outreach.len(), 1);
        assert_eq!(outcome.outreach[0].record_id, "young");
        // Four business days in with zero touches logged
        assert_eq!(outcome.outreach[0].touch.status, TouchStatus::Behind);
        assert_eq!(outcome.report.touch_behind, 1);
        assert_eq!(outcome.report.touch_critical, 0);
    }

    #[test]
    fn test_outreach_counts_touches_from_store() {
        let db = test_db();
        db.upsert_record(&testutil::record("r1")).unwrap();
        for i in 0..6 {
            db.insert_activity(&testutil::touch(
                "r1",
                i,
                ActivityKind::Call,
                testutil::ts(2026, 8, 4, 9 + i),
            ))
            .unwrap();
        }

        let outcome = scan(&db, &RecordingSink::default());
        assert_eq!(outcome.outreach[0].touch.touches.total, 6);
        assert_eq!(outcome.outreach[0].touch.status, TouchStatus::OnTrack);
        assert_eq!(outcome.report.touch_behind, 0);
    }

    #[test]
    fn test_closed_record_clears_leftover_commitment() {
        let db = test_db();
        seed_violating_record(&db, "r1");

        let sink = RecordingSink::default();
        scan(&db, &sink);

        let mut record = testutil::record("r1");
        record.pipeline = PipelineType::Upsell;
        record.amount = None;
        record.stage_category = crate::types::StageCategory::ClosedWon;
        db.upsert_record(&record).unwrap();

        let outcome = scan(&db, &sink);
        assert_eq!(outcome.report.commitments_cleared, 1);
        assert!(outcome.hygiene_queue.is_empty());
    }
}
