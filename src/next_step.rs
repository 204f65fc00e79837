//! Next-step analysis: classify the free-text "next step" field and decide
//! when re-analysis is required.
//!
//! Date extraction itself sits behind the [`DateExtractor`] seam: one
//! synchronous, fallible call per analysis. When the call fails the prior
//! analysis stays untouched and the error surfaces to the caller; the
//! analyzer never invents a status. Staleness is exposed as the
//! `needs_analysis` flag; the caller decides whether to re-run extraction.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TriageError;

/// Classification of a record's next-step text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStepStatus {
    /// No text present. Terminal until text is added.
    Empty,
    /// Text present, nothing date-like in it.
    NoDate,
    /// An explicit due date was extracted.
    DateFound,
    /// A due date was inferred (missing year, relative word).
    DateInferred,
    /// Something date-like is present but not reliably extractable.
    DateUnclear,
    /// The next action is on the counterparty, not the owner.
    AwaitingExternal,
    /// A date-shaped token that fails calendar validation.
    Unparseable,
}

impl NextStepStatus {
    /// True for the statuses that carry a usable due date.
    pub fn has_due_date(self) -> bool {
        matches!(self, NextStepStatus::DateFound | NextStepStatus::DateInferred)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NextStepStatus::Empty => "empty",
            NextStepStatus::NoDate => "no_date",
            NextStepStatus::DateFound => "date_found",
            NextStepStatus::DateInferred => "date_inferred",
            NextStepStatus::DateUnclear => "date_unclear",
            NextStepStatus::AwaitingExternal => "awaiting_external",
            NextStepStatus::Unparseable => "unparseable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "empty" => Some(NextStepStatus::Empty),
            "no_date" => Some(NextStepStatus::NoDate),
            "date_found" => Some(NextStepStatus::DateFound),
            "date_inferred" => Some(NextStepStatus::DateInferred),
            "date_unclear" => Some(NextStepStatus::DateUnclear),
            "awaiting_external" => Some(NextStepStatus::AwaitingExternal),
            "unparseable" => Some(NextStepStatus::Unparseable),
            _ => None,
        }
    }
}

/// Presentation health derived from an analysis and today's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStepHealth {
    Overdue,
    Compliant,
}

/// Stored result of the last date-extraction pass over a record's
/// next-step text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStepAnalysis {
    pub status: NextStepStatus,
    pub due_date: Option<NaiveDate>,
    pub confidence: Option<f64>,
    pub analyzed_at: DateTime<Utc>,
    /// Fingerprint of the text this analysis was computed from, which is how "text
    /// changed since analysis" is detected without keeping the prior text.
    pub text_fingerprint: String,
}

impl NextStepAnalysis {
    /// Overdue iff a usable due date exists and has passed. Awaiting-external
    /// records are never overdue; the ball is not in the owner's court.
    pub fn health(&self, today: NaiveDate) -> NextStepHealth {
        if self.status == NextStepStatus::AwaitingExternal {
            return NextStepHealth::Compliant;
        }
        match self.due_date {
            Some(due) if self.status.has_due_date() && due < today => NextStepHealth::Overdue,
            _ => NextStepHealth::Compliant,
        }
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.health(today) == NextStepHealth::Overdue
    }
}

/// Fingerprint of next-step text (trimmed), for change detection.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether date extraction must be (re-)run for this record: no analysis
/// yet, the text changed since the last one, or the last one is older than
/// the freshness window.
pub fn needs_analysis(
    text: Option<&str>,
    prior: Option<&NextStepAnalysis>,
    now: DateTime<Utc>,
    freshness_days: i64,
) -> bool {
    let Some(prior) = prior else {
        return true;
    };
    if prior.text_fingerprint != fingerprint(text.unwrap_or("")) {
        return true;
    }
    now - prior.analyzed_at > Duration::days(freshness_days)
}

/// What a date-extraction pass produced. `status` is one of the date-ish
/// classifications (`no_date`, `date_found`, `date_inferred`,
/// `date_unclear`, `unparseable`); the analyzer owns `empty` and
/// `awaiting_external`.
#[derive(Debug, Clone, PartialEq)]
pub struct DateExtraction {
    pub status: NextStepStatus,
    pub due_date: Option<NaiveDate>,
    pub confidence: Option<f64>,
}

/// External date-extraction seam.
pub trait DateExtractor {
    fn extract(&self, text: &str) -> Result<DateExtraction, TriageError>;
}

/// Phrases that put the next action on the counterparty.
fn awaiting_external_re() -> Regex {
    Regex::new(
        r"(?i)\b(waiting (?:on|for)|awaiting|blocked on|on hold|customer to\b|client to\b|pending (?:their|customer|client|legal|signature))",
    )
    .expect("awaiting-external regex must compile")
}

/// True when the text signals the counterparty owns the next move.
pub fn is_awaiting_external(text: &str) -> bool {
    awaiting_external_re().is_match(text)
}

/// Analyze a record's next-step text.
///
/// Empty text and awaiting-external phrasing are classified locally without
/// touching the extractor; everything else makes exactly one extraction
/// call. An extraction error propagates; the caller keeps whatever
/// analysis it already had.
pub fn analyze(
    text: Option<&str>,
    extractor: &dyn DateExtractor,
    now: DateTime<Utc>,
) -> Result<NextStepAnalysis, TriageError> {
    let trimmed = text.map(str::trim).unwrap_or("");

    if trimmed.is_empty() {
        return Ok(NextStepAnalysis {
            status: NextStepStatus::Empty,
            due_date: None,
            confidence: None,
            analyzed_at: now,
            text_fingerprint: fingerprint(""),
        });
    }

    if is_awaiting_external(trimmed) {
        return Ok(NextStepAnalysis {
            status: NextStepStatus::AwaitingExternal,
            due_date: None,
            confidence: None,
            analyzed_at: now,
            text_fingerprint: fingerprint(trimmed),
        });
    }

    let extraction = extractor.extract(trimmed)?;
    Ok(NextStepAnalysis {
        status: extraction.status,
        due_date: extraction.due_date,
        confidence: extraction.confidence,
        analyzed_at: now,
        text_fingerprint: fingerprint(trimmed),
    })
}

// =============================================================================
// Built-in regex extractor
// =============================================================================

/// Regex-based date extraction: explicit ISO dates, US slash dates,
/// month-name dates, and today/tomorrow. Year-less forms are anchored to a
/// reference date and roll forward to the next occurrence.
pub struct RegexDateExtractor {
    reference: NaiveDate,
    iso: Regex,
    slash: Regex,
    month_day: Regex,
    relative: Regex,
    any_digit: Regex,
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

impl RegexDateExtractor {
    /// `reference` anchors year inference for year-less dates (normally
    /// today).
    pub fn new(reference: NaiveDate) -> Self {
        RegexDateExtractor {
            reference,
            iso: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date regex must compile"),
            slash: Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\b")
                .expect("slash date regex must compile"),
            month_day: Regex::new(
                r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b",
            )
            .expect("month-day regex must compile"),
            relative: Regex::new(r"(?i)\b(today|tomorrow)\b")
                .expect("relative date regex must compile"),
            any_digit: Regex::new(r"\d").expect("digit regex must compile"),
        }
    }

    /// Year-less month/day rolls forward: the next occurrence on or after
    /// the reference date.
    fn infer_year(&self, month: u32, day: u32) -> Option<NaiveDate> {
        let this_year = NaiveDate::from_ymd_opt(self.reference.year(), month, day)?;
        if this_year >= self.reference {
            Some(this_year)
        } else {
            NaiveDate::from_ymd_opt(self.reference.year() + 1, month, day)
        }
    }

    fn found(due: NaiveDate, confidence: f64) -> DateExtraction {
        DateExtraction {
            status: NextStepStatus::DateFound,
            due_date: Some(due),
            confidence: Some(confidence),
        }
    }

    fn inferred(due: NaiveDate, confidence: f64) -> DateExtraction {
        DateExtraction {
            status: NextStepStatus::DateInferred,
            due_date: Some(due),
            confidence: Some(confidence),
        }
    }

    fn unparseable() -> DateExtraction {
        DateExtraction {
            status: NextStepStatus::Unparseable,
            due_date: None,
            confidence: None,
        }
    }
}

impl DateExtractor for RegexDateExtractor {
    fn extract(&self, text: &str) -> Result<DateExtraction, TriageError> {
        if let Some(caps) = self.iso.captures(text) {
            let (y, m, d) = (
                caps[1].parse::<i32>().unwrap_or(0),
                caps[2].parse::<u32>().unwrap_or(0),
                caps[3].parse::<u32>().unwrap_or(0),
            );
            return Ok(match NaiveDate::from_ymd_opt(y, m, d) {
                Some(due) => Self::found(due, 0.95),
                None => Self::unparseable(),
            });
        }

        if let Some(caps) = self.slash.captures(text) {
            let month = caps[1].parse::<u32>().unwrap_or(0);
            let day = caps[2].parse::<u32>().unwrap_or(0);
            return Ok(match caps.get(3) {
                Some(year) => {
                    let mut y = year.as_str().parse::<i32>().unwrap_or(0);
                    if y < 100 {
                        y += 2000;
                    }
                    match NaiveDate::from_ymd_opt(y, month, day) {
                        Some(due) => Self::found(due, 0.85),
                        None => Self::unparseable(),
                    }
                }
                None => match self.infer_year(month, day) {
                    Some(due) => Self::inferred(due, 0.7),
                    None => Self::unparseable(),
                },
            });
        }

        if let Some(caps) = self.month_day.captures(text) {
            let name = caps[1].to_lowercase();
            let month = MONTHS.iter().position(|m| *m == name).unwrap_or(0) as u32 + 1;
            let day = caps[2].parse::<u32>().unwrap_or(0);
            return Ok(match self.infer_year(month, day) {
                Some(due) => Self::inferred(due, 0.75),
                None => Self::unparseable(),
            });
        }

        if let Some(caps) = self.relative.captures(text) {
            let due = if caps[1].to_lowercase() == "today" {
                self.reference
            } else {
                self.reference + Duration::days(1)
            };
            return Ok(Self::inferred(due, 0.8));
        }

        // Digits without a recognizable date shape: something is there, we
        // just can't read it. No digits at all: plain dateless text.
        Ok(if self.any_digit.is_match(text) {
            DateExtraction {
                status: NextStepStatus::DateUnclear,
                due_date: None,
                confidence: None,
            }
        } else {
            DateExtraction {
                status: NextStepStatus::NoDate,
                due_date: None,
                confidence: None,
            }
        })
    }
}
