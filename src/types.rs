//! Shared domain types: the record snapshot, activity events, configuration.
//!
//! A `Record` is an immutable-per-evaluation snapshot of a CRM deal or
//! company. The working store owns it; the engine only reads it. All CRM
//! fields that can be absent are typed `Option`s: an invalid or missing
//! value becomes `None` at the store boundary, never a silently coerced
//! default.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// What kind of CRM object a record snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Deal,
    Company,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Deal => "deal",
            RecordKind::Company => "company",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deal" => Some(RecordKind::Deal),
            "company" => Some(RecordKind::Company),
            _ => None,
        }
    }
}

/// Pipeline a record is worked in. Each pipeline owns its hygiene policy.
///
/// Company records carry `AccountManagement`; the three deal pipelines map
/// from the CRM's pipeline ids during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    StandardSales,
    Upsell,
    Renewal,
    AccountManagement,
}

impl PipelineType {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineType::StandardSales => "standard_sales",
            PipelineType::Upsell => "upsell",
            PipelineType::Renewal => "renewal",
            PipelineType::AccountManagement => "account_management",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard_sales" => Some(PipelineType::StandardSales),
            "upsell" => Some(PipelineType::Upsell),
            "renewal" => Some(PipelineType::Renewal),
            "account_management" => Some(PipelineType::AccountManagement),
            _ => None,
        }
    }
}

/// Stage bucket, resolved once at the store boundary when a record is
/// synced. Evaluators never re-derive it from stage-name substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    Open,
    ClosedWon,
    ClosedLost,
}

impl StageCategory {
    pub fn is_closed(self) -> bool {
        matches!(self, StageCategory::ClosedWon | StageCategory::ClosedLost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageCategory::Open => "open",
            StageCategory::ClosedWon => "closed_won",
            StageCategory::ClosedLost => "closed_lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(StageCategory::Open),
            "closed_won" => Some(StageCategory::ClosedWon),
            "closed_lost" => Some(StageCategory::ClosedLost),
            _ => None,
        }
    }
}

/// Snapshot of a deal or company as the evaluators see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    /// External CRM object id, when known.
    pub crm_id: Option<String>,
    pub kind: RecordKind,
    pub name: String,
    pub pipeline: PipelineType,
    pub stage: Option<String>,
    pub stage_category: StageCategory,
    pub stage_entered_at: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub products: Vec<String>,
    pub close_date: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
    /// Set when the latest sentiment pass flagged the relationship negative.
    pub negative_sentiment: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub next_activity_at: Option<DateTime<Utc>>,
    /// Free-text "next step" as entered by the owner.
    pub next_step: Option<String>,
    pub owner: Option<String>,
    pub updated_at: String,
    pub archived: bool,
}

impl Record {
    /// The next-step text with surrounding whitespace stripped, or `None`
    /// when the field is empty. Evaluators treat whitespace-only as empty.
    pub fn next_step_text(&self) -> Option<&str> {
        self.next_step
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Kind of logged outreach or activity event against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Call,
    OutboundEmail,
    InboundEmail,
    Meeting,
    Note,
}

impl ActivityKind {
    /// Calls and outbound emails count toward touch compliance.
    pub fn is_touch(self) -> bool {
        matches!(self, ActivityKind::Call | ActivityKind::OutboundEmail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Call => "call",
            ActivityKind::OutboundEmail => "outbound_email",
            ActivityKind::InboundEmail => "inbound_email",
            ActivityKind::Meeting => "meeting",
            ActivityKind::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(ActivityKind::Call),
            "outbound_email" => Some(ActivityKind::OutboundEmail),
            "inbound_email" => Some(ActivityKind::InboundEmail),
            "meeting" => Some(ActivityKind::Meeting),
            "note" => Some(ActivityKind::Note),
            _ => None,
        }
    }
}

/// A logged activity event against a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub record_id: String,
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
}

/// Tunable evaluation thresholds.
///
/// The exact values are configuration, not law. Defaults below match the
/// business expectations the rules were calibrated against, and every one
/// can be overridden in `~/.dealdesk/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// Re-run date extraction when the last analysis is older than this.
    #[serde(default = "default_next_step_freshness_days")]
    pub next_step_freshness_days: i64,
    /// Business days in one stage before it counts as stale.
    #[serde(default = "default_stale_stage_days")]
    pub stale_stage_days: i64,
    /// Business days without activity before a drought is flagged.
    #[serde(default = "default_activity_drought_days")]
    pub activity_drought_days: i64,
    /// Amount at or above which a deal is high-value.
    #[serde(default = "default_high_value_amount")]
    pub high_value_amount: f64,
    /// Touches expected inside the post-creation window.
    #[serde(default = "default_touch_target")]
    pub touch_target: u32,
    /// Length of the post-creation touch window, in business days.
    #[serde(default = "default_touch_window_days")]
    pub touch_window_days: u32,
}

fn default_next_step_freshness_days() -> i64 {
    7
}

fn default_stale_stage_days() -> i64 {
    15
}

fn default_activity_drought_days() -> i64 {
    10
}

fn default_high_value_amount() -> f64 {
    50_000.0
}

fn default_touch_target() -> u32 {
    6
}

fn default_touch_window_days() -> u32 {
    5
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            next_step_freshness_days: default_next_step_freshness_days(),
            stale_stage_days: default_stale_stage_days(),
            activity_drought_days: default_activity_drought_days(),
            high_value_amount: default_high_value_amount(),
            touch_target: default_touch_target(),
            touch_window_days: default_touch_window_days(),
        }
    }
}

/// Top-level configuration, loaded from `~/.dealdesk/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Interval between background triage scans, in seconds.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Skip external task creation entirely (dry-run triage).
    #[serde(default)]
    pub suppress_tasks: bool,
}

fn default_scan_interval_secs() -> u64 {
    4 * 60 * 60
}

impl Default for Config {
    fn default() -> Self {
        Config {
            thresholds: Thresholds::default(),
            scan_interval_secs: default_scan_interval_secs(),
            suppress_tasks: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_step_text_trims_whitespace() {
        let mut record = crate::testutil::record("r1");
        record.next_step = Some("   ".to_string());
        assert!(record.next_step_text().is_none());

        record.next_step = Some("  call Friday  ".to_string());
        assert_eq!(record.next_step_text(), Some("call Friday"));
    }

    #[test]
    fn test_touch_kinds() {
        assert!(ActivityKind::Call.is_touch());
        assert!(ActivityKind::OutboundEmail.is_touch());
        assert!(!ActivityKind::InboundEmail.is_touch());
        assert!(!ActivityKind::Meeting.is_touch());
        assert!(!ActivityKind::Note.is_touch());
    }

    #[test]
    fn test_enum_round_trips() {
        for kind in [ActivityKind::Call, ActivityKind::OutboundEmail, ActivityKind::Note] {
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
        }
        for stage in [
            StageCategory::Open,
            StageCategory::ClosedWon,
            StageCategory::ClosedLost,
        ] {
            assert_eq!(StageCategory::parse(stage.as_str()), Some(stage));
        }
        for pipeline in [
            PipelineType::StandardSales,
            PipelineType::Upsell,
            PipelineType::Renewal,
            PipelineType::AccountManagement,
        ] {
            assert_eq!(PipelineType::parse(pipeline.as_str()), Some(pipeline));
        }
        assert_eq!(PipelineType::parse("mystery"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.thresholds.touch_target, 6);
        assert_eq!(config.thresholds.touch_window_days, 5);
        assert_eq!(config.scan_interval_secs, 4 * 60 * 60);
        assert!(!config.suppress_tasks);
    }

    #[test]
    fn test_thresholds_partial_override() {
        let thresholds: Thresholds =
            serde_json::from_str(r#"{"staleStageDays": 20}"#).unwrap();
        assert_eq!(thresholds.stale_stage_days, 20);
        assert_eq!(thresholds.activity_drought_days, 10);
    }
}
