//! External-task idempotency: decide whether an existing reminder still
//! covers the currently detected issue set.
//!
//! Signatures are unordered label sets. An existing task covers the current
//! issues iff current ⊆ existing. A covered set skips creation (unless the
//! caller forces it), a new issue triggers a task for the superset and the
//! old ledger row is superseded, never deleted.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::TriageDb;
use crate::error::TriageError;

/// Ledger row for a previously created external reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingTaskRecord {
    pub task_id: String,
    pub record_id: String,
    pub created_at: DateTime<Utc>,
    pub issue_signature: BTreeSet<String>,
}

/// Outcome of the idempotency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDecision {
    pub create: bool,
    pub covers_all: bool,
}

/// Pure idempotency rule. Same inputs always yield the same decision.
pub fn should_create(
    existing: Option<&ExistingTaskRecord>,
    current: &BTreeSet<String>,
    force: bool,
) -> TaskDecision {
    let Some(existing) = existing else {
        return TaskDecision {
            create: true,
            covers_all: false,
        };
    };

    let covers_all = current.is_subset(&existing.issue_signature);
    TaskDecision {
        create: force || !covers_all,
        covers_all,
    }
}

/// Context handed to the task sink alongside the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub record_name: String,
    pub detail: String,
}

/// Boundary to the external reminder system. Failures surface up unchanged;
/// the engine never retries.
pub trait TaskSink {
    fn create_task(
        &self,
        record_id: &str,
        signature: &BTreeSet<String>,
        metadata: &TaskMetadata,
    ) -> Result<String, TriageError>;
}

/// Sink for dry runs and the CLI: logs the would-be reminder and mints a
/// local task id.
pub struct LoggingTaskSink;

impl TaskSink for LoggingTaskSink {
    fn create_task(
        &self,
        record_id: &str,
        signature: &BTreeSet<String>,
        metadata: &TaskMetadata,
    ) -> Result<String, TriageError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "TaskSink: created task {} for {} ({}): {}",
            task_id,
            record_id,
            metadata.record_name,
            signature.iter().cloned().collect::<Vec<_>>().join(", "),
        );
        Ok(task_id)
    }
}

/// What `ensure_task` did for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Created { task_id: String, superseded: bool },
    Skipped { covers_all: bool },
}

/// Create an external reminder for the current issue set unless an existing
/// task already covers it. A created task is recorded in the ledger,
/// superseding (not deleting) any prior row.
pub fn ensure_task(
    db: &TriageDb,
    sink: &dyn TaskSink,
    record_id: &str,
    signature: &BTreeSet<String>,
    metadata: &TaskMetadata,
    force: bool,
) -> Result<TaskOutcome, TriageError> {
    let existing = db.fetch_existing_task(record_id)?;
    let decision = should_create(existing.as_ref(), signature, force);

    if !decision.create {
        return Ok(TaskOutcome::Skipped {
            covers_all: decision.covers_all,
        });
    }

    let task_id = sink.create_task(record_id, signature, metadata)?;
    db.record_task(record_id, &task_id, signature, Utc::now())?;

    Ok(TaskOutcome::Created {
        task_id,
        superseded: existing.is_some(),
    })
}
