use chrono::Utc;
use rusqlite::params;

use super::{parse_date, parse_ts, DbError, TriageDb};
use crate::types::{ActivityEvent, ActivityKind, PipelineType, Record, RecordKind, StageCategory};

const RECORD_COLUMNS: &str = "id, crm_id, kind, name, pipeline, stage, stage_category,
    stage_entered_at, amount, products, close_date, contract_end, negative_sentiment,
    created_at, last_activity_at, next_activity_at, next_step, owner, updated_at, archived";

/// Filter for `fetch_records`. The default fetches every active record.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub pipeline: Option<PipelineType>,
    pub kind: Option<RecordKind>,
    pub include_archived: bool,
}

/// Raw column values before enum/date conversion.
struct RecordRow {
    id: String,
    crm_id: Option<String>,
    kind: String,
    name: String,
    pipeline: String,
    stage: Option<String>,
    stage_category: String,
    stage_entered_at: Option<String>,
    amount: Option<f64>,
    products: Option<String>,
    close_date: Option<String>,
    contract_end: Option<String>,
    negative_sentiment: bool,
    created_at: String,
    last_activity_at: Option<String>,
    next_activity_at: Option<String>,
    next_step: Option<String>,
    owner: Option<String>,
    updated_at: String,
    archived: bool,
}

fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        crm_id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        pipeline: row.get(4)?,
        stage: row.get(5)?,
        stage_category: row.get(6)?,
        stage_entered_at: row.get(7)?,
        amount: row.get(8)?,
        products: row.get(9)?,
        close_date: row.get(10)?,
        contract_end: row.get(11)?,
        negative_sentiment: row.get(12)?,
        created_at: row.get(13)?,
        last_activity_at: row.get(14)?,
        next_activity_at: row.get(15)?,
        next_step: row.get(16)?,
        owner: row.get(17)?,
        updated_at: row.get(18)?,
        archived: row.get(19)?,
    })
}

impl RecordRow {
    /// Convert raw columns to the typed snapshot. Identity and
    /// classification columns must parse: they are resolved at sync time,
    /// so a bad value means a corrupt row, not a missing CRM field.
    fn into_record(self) -> Result<Record, DbError> {
        let invalid = |id: &str, field: &'static str| DbError::InvalidField {
            table: "records",
            id: id.to_string(),
            field,
        };

        let kind = RecordKind::parse(&self.kind).ok_or_else(|| invalid(&self.id, "kind"))?;
        let pipeline =
            PipelineType::parse(&self.pipeline).ok_or_else(|| invalid(&self.id, "pipeline"))?;
        let stage_category = StageCategory::parse(&self.stage_category)
            .ok_or_else(|| invalid(&self.id, "stage_category"))?;
        let created_at = parse_ts(Some(self.created_at))
            .ok_or_else(|| invalid(&self.id, "created_at"))?;

        let products = self
            .products
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default();

        Ok(Record {
            id: self.id,
            crm_id: self.crm_id,
            kind,
            name: self.name,
            pipeline,
            stage: self.stage,
            stage_category,
            stage_entered_at: parse_date(self.stage_entered_at),
            amount: self.amount,
            products,
            close_date: parse_date(self.close_date),
            contract_end: parse_date(self.contract_end),
            negative_sentiment: self.negative_sentiment,
            created_at,
            last_activity_at: parse_ts(self.last_activity_at),
            next_activity_at: parse_ts(self.next_activity_at),
            next_step: self.next_step,
            owner: self.owner,
            updated_at: self.updated_at,
            archived: self.archived,
        })
    }
}

impl TriageDb {
    // =========================================================================
    // Records
    // =========================================================================

    /// Insert or update a record snapshot.
    pub fn upsert_record(&self, record: &Record) -> Result<(), DbError> {
        let products = serde_json::to_string(&record.products).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO records (
                id, crm_id, kind, name, pipeline, stage, stage_category,
                stage_entered_at, amount, products, close_date, contract_end,
                negative_sentiment, created_at, last_activity_at, next_activity_at,
                next_step, owner, updated_at, archived
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT(id) DO UPDATE SET
                crm_id = excluded.crm_id,
                kind = excluded.kind,
                name = excluded.name,
                pipeline = excluded.pipeline,
                stage = excluded.stage,
                stage_category = excluded.stage_category,
                stage_entered_at = excluded.stage_entered_at,
                amount = excluded.amount,
                products = excluded.products,
                close_date = excluded.close_date,
                contract_end = excluded.contract_end,
                negative_sentiment = excluded.negative_sentiment,
                created_at = excluded.created_at,
                last_activity_at = excluded.last_activity_at,
                next_activity_at = excluded.next_activity_at,
                next_step = excluded.next_step,
                owner = excluded.owner,
                updated_at = excluded.updated_at,
                archived = excluded.archived",
            params![
                record.id,
                record.crm_id,
                record.kind.as_str(),
                record.name,
                record.pipeline.as_str(),
                record.stage,
                record.stage_category.as_str(),
                record.stage_entered_at.map(|d| d.to_string()),
                record.amount,
                products,
                record.close_date.map(|d| d.to_string()),
                record.contract_end.map(|d| d.to_string()),
                record.negative_sentiment as i32,
                record.created_at.to_rfc3339(),
                record.last_activity_at.map(|t| t.to_rfc3339()),
                record.next_activity_at.map(|t| t.to_rfc3339()),
                record.next_step,
                record.owner,
                record.updated_at,
                record.archived as i32,
            ],
        )?;
        Ok(())
    }

    /// Get a record by ID.
    pub fn get_record(&self, id: &str) -> Result<Option<Record>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_record_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?.into_record()?)),
            None => Ok(None),
        }
    }

    /// Fetch records matching the filter, ordered by name then id so batch
    /// evaluation output is deterministic.
    pub fn fetch_records(&self, filter: &RecordFilter) -> Result<Vec<Record>, DbError> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if !filter.include_archived {
            sql.push_str(" AND archived = 0");
        }
        if let Some(pipeline) = filter.pipeline {
            sql.push_str(" AND pipeline = ?");
            args.push(pipeline.as_str().to_string());
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            args.push(kind.as_str().to_string());
        }
        sql.push_str(" ORDER BY name COLLATE NOCASE, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), map_record_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Mark a record archived so scans stop evaluating it.
    pub fn archive_record(&self, id: &str) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE records SET archived = 1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    // =========================================================================
    // Activity events
    // =========================================================================

    /// Record an activity event against a record.
    pub fn insert_activity(&self, event: &ActivityEvent) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO activity_events (id, record_id, kind, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.id,
                event.record_id,
                event.kind.as_str(),
                event.occurred_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All activity for a record, oldest first. Rows with an unknown kind or
    /// unparseable timestamp are skipped rather than failing the fetch.
    pub fn fetch_activity(&self, record_id: &str) -> Result<Vec<ActivityEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, kind, occurred_at FROM activity_events
             WHERE record_id = ?1 ORDER BY occurred_at, id",
        )?;
        let rows = stmt.query_map(params![record_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, record_id, kind, occurred_at) = row?;
            let (Some(kind), Some(occurred_at)) =
                (ActivityKind::parse(&kind), parse_ts(Some(occurred_at)))
            else {
                continue;
            };
            events.push(ActivityEvent {
                id,
                record_id,
                kind,
                occurred_at,
            });
        }
        Ok(events)
    }
}
