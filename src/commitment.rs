//! Commitment lifecycle: a human-set promise date to fix a hygiene
//! violation.
//!
//! States run `needs_commitment → pending → escalated`. A commitment row is
//! opened when a record first falls out of hygiene compliance; a human
//! promotes it to `pending` by setting a due date (1–30 days out,
//! validated, never clamped); `escalated` is purely derived from
//! `now > due_date` on every read; there is no background timer and no
//! stored state column to drift. Resolution is the violation clearing: the
//! row is removed, not transitioned.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::business_days_between;
use crate::db::TriageDb;
use crate::error::TriageError;

/// Inclusive bounds for how far out a commitment date may be set.
pub const MIN_COMMITMENT_DAYS: i64 = 1;
pub const MAX_COMMITMENT_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentState {
    NeedsCommitment,
    Pending,
    Escalated,
}

/// An open commitment against one record. At most one exists per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub record_id: String,
    pub due_date: Option<NaiveDate>,
    pub set_at: Option<DateTime<Utc>>,
}

impl Commitment {
    /// State is a pure function of `(due_date, today)`: two reads with the
    /// same inputs can never disagree.
    pub fn state(&self, today: NaiveDate) -> CommitmentState {
        match self.due_date {
            None => CommitmentState::NeedsCommitment,
            Some(due) if today > due => CommitmentState::Escalated,
            Some(_) => CommitmentState::Pending,
        }
    }

    /// Business days until the due date; negative once escalated.
    pub fn days_remaining(&self, today: NaiveDate) -> Option<i64> {
        self.due_date.map(|due| business_days_between(today, due))
    }

    pub fn view(&self, today: NaiveDate) -> CommitmentView {
        CommitmentView {
            record_id: self.record_id.clone(),
            state: self.state(today),
            due_date: self.due_date,
            days_remaining: self.days_remaining(today),
        }
    }
}

/// Presentation shape for queues and dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentView {
    pub record_id: String,
    pub state: CommitmentState,
    pub due_date: Option<NaiveDate>,
    pub days_remaining: Option<i64>,
}

/// Validate a proposed commitment date: 1–30 days in the future at set
/// time. Out-of-range dates are rejected, never clamped.
pub fn validate_due_date(due: NaiveDate, today: NaiveDate) -> Result<(), TriageError> {
    let delta = (due - today).num_days();
    if !(MIN_COMMITMENT_DAYS..=MAX_COMMITMENT_DAYS).contains(&delta) {
        return Err(TriageError::CommitmentDateOutOfRange {
            min: MIN_COMMITMENT_DAYS,
            max: MAX_COMMITMENT_DAYS,
            got: delta,
        });
    }
    Ok(())
}

/// Set (or update) the due date on a record's open commitment.
///
/// Updating an already-pending commitment re-validates the same way and
/// resets escalation eligibility. A record with no open commitment is not
/// in violation, so writing a date for it is rejected.
pub fn set_commitment(
    db: &TriageDb,
    record_id: &str,
    due: NaiveDate,
    today: NaiveDate,
) -> Result<Commitment, TriageError> {
    validate_due_date(due, today)?;

    if db.get_commitment(record_id)?.is_none() {
        return Err(TriageError::NoOpenCommitment(record_id.to_string()));
    }

    let set_at = Utc::now();
    db.write_commitment(record_id, due, set_at)?;

    Ok(Commitment {
        record_id: record_id.to_string(),
        due_date: Some(due),
        set_at: Some(set_at),
    })
}
