use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use super::{parse_date, parse_ts, DbError, TriageDb};
use crate::commitment::Commitment;
use crate::next_step::{NextStepAnalysis, NextStepStatus};
use crate::task_dedup::ExistingTaskRecord;

impl TriageDb {
    // =========================================================================
    // Commitments
    // =========================================================================

    /// Open a `needs_commitment` row for a record if none exists. Returns
    /// `true` when a row was created.
    pub fn open_commitment(&self, record_id: &str) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO commitments (record_id) VALUES (?1)",
            params![record_id],
        )?;
        Ok(rows > 0)
    }

    /// The record's open commitment, if any.
    pub fn get_commitment(&self, record_id: &str) -> Result<Option<Commitment>, DbError> {
        let row: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT due_date, set_at FROM commitments WHERE record_id = ?1",
                params![record_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(due_date, set_at)| Commitment {
            record_id: record_id.to_string(),
            due_date: parse_date(due_date),
            set_at: parse_ts(set_at),
        }))
    }

    /// Write a due date onto an existing commitment row. Last write wins on
    /// a race, since SQLite serializes the update. Returns `false` when the
    /// record has no open commitment.
    pub fn write_commitment(
        &self,
        record_id: &str,
        due: NaiveDate,
        set_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE commitments SET due_date = ?1, set_at = ?2 WHERE record_id = ?3",
            params![due.to_string(), set_at.to_rfc3339(), record_id],
        )?;
        Ok(rows > 0)
    }

    /// Remove a record's commitment: the violation cleared, which is the
    /// resolution signal. Returns `true` when a row was removed.
    pub fn clear_commitment(&self, record_id: &str) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "DELETE FROM commitments WHERE record_id = ?1",
            params![record_id],
        )?;
        Ok(rows > 0)
    }

    /// All open commitments, keyed by record, in stable record order.
    pub fn list_commitments(&self) -> Result<Vec<Commitment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, due_date, set_at FROM commitments ORDER BY record_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut commitments = Vec::new();
        for row in rows {
            let (record_id, due_date, set_at) = row?;
            commitments.push(Commitment {
                record_id,
                due_date: parse_date(due_date),
                set_at: parse_ts(set_at),
            });
        }
        Ok(commitments)
    }

    // =========================================================================
    // External task ledger
    // =========================================================================

    /// The live (latest) ledger row for a record's external reminder.
    pub fn fetch_existing_task(
        &self,
        record_id: &str,
    ) -> Result<Option<ExistingTaskRecord>, DbError> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT task_id, issue_signature, created_at FROM task_records
                 WHERE record_id = ?1 ORDER BY id DESC LIMIT 1",
                params![record_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((task_id, signature_json, created_at)) = row else {
            return Ok(None);
        };

        let issue_signature: BTreeSet<String> =
            serde_json::from_str(&signature_json).unwrap_or_default();
        let created_at = parse_ts(Some(created_at)).ok_or_else(|| DbError::InvalidField {
            table: "task_records",
            id: record_id.to_string(),
            field: "created_at",
        })?;

        Ok(Some(ExistingTaskRecord {
            task_id,
            record_id: record_id.to_string(),
            created_at,
            issue_signature,
        }))
    }

    /// Append a ledger row for a created task. Prior rows stay; they are
    /// superseded by ordering, never deleted.
    pub fn record_task(
        &self,
        record_id: &str,
        task_id: &str,
        signature: &BTreeSet<String>,
        created_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let signature_json = serde_json::to_string(signature).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO task_records (task_id, record_id, issue_signature, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![task_id, record_id, signature_json, created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Next-step analyses
    // =========================================================================

    /// The stored analysis for a record's next-step text, if any. A row
    /// whose status no longer parses is treated as absent so it gets
    /// re-analyzed rather than failing the scan.
    pub fn get_next_step_analysis(
        &self,
        record_id: &str,
    ) -> Result<Option<NextStepAnalysis>, DbError> {
        let row: Option<(String, Option<String>, Option<f64>, String, String)> = self
            .conn
            .query_row(
                "SELECT status, due_date, confidence, analyzed_at, text_fingerprint
                 FROM next_step_analyses WHERE record_id = ?1",
                params![record_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, due_date, confidence, analyzed_at, text_fingerprint)) = row else {
            return Ok(None);
        };

        let (Some(status), Some(analyzed_at)) = (
            NextStepStatus::parse(&status),
            parse_ts(Some(analyzed_at)),
        ) else {
            return Ok(None);
        };

        Ok(Some(NextStepAnalysis {
            status,
            due_date: parse_date(due_date),
            confidence,
            analyzed_at,
            text_fingerprint,
        }))
    }

    /// Store (or replace) the analysis for a record.
    pub fn write_next_step_analysis(
        &self,
        record_id: &str,
        analysis: &NextStepAnalysis,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO next_step_analyses
                (record_id, status, due_date, confidence, analyzed_at, text_fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record_id,
                analysis.status.as_str(),
                analysis.due_date.map(|d| d.to_string()),
                analysis.confidence,
                analysis.analyzed_at.to_rfc3339(),
                analysis.text_fingerprint,
            ],
        )?;
        Ok(())
    }
}
