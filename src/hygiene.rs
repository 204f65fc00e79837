//! Hygiene policy evaluation: which required fields a record left empty.
//!
//! Each pipeline declares an ordered required-field list. A field counts as
//! missing when it is null, an empty string, or an empty collection. The
//! declared order is the display order; the idempotency *signature* is the
//! unordered label set, so reordering a policy never re-triggers external
//! reminders.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{PipelineType, Record};

/// A field some pipeline's policy can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    Amount,
    CloseDate,
    Products,
    NextStep,
    ContractEnd,
    Owner,
}

impl RequiredField {
    /// Human label, also the unit of the issue signature.
    pub fn label(self) -> &'static str {
        match self {
            RequiredField::Amount => "Amount",
            RequiredField::CloseDate => "Close Date",
            RequiredField::Products => "Products",
            RequiredField::NextStep => "Next Step",
            RequiredField::ContractEnd => "Contract End Date",
            RequiredField::Owner => "Owner",
        }
    }

    fn is_missing(self, record: &Record) -> bool {
        match self {
            RequiredField::Amount => record.amount.is_none(),
            RequiredField::CloseDate => record.close_date.is_none(),
            RequiredField::Products => record.products.is_empty(),
            RequiredField::NextStep => record.next_step_text().is_none(),
            RequiredField::ContractEnd => record.contract_end.is_none(),
            RequiredField::Owner => record
                .owner
                .as_deref()
                .map(|s| s.trim().is_empty())
                .unwrap_or(true),
        }
    }
}

/// The ordered required-field list each pipeline owns.
pub fn required_fields(pipeline: PipelineType) -> &'static [RequiredField] {
    match pipeline {
        PipelineType::StandardSales => &[
            RequiredField::Amount,
            RequiredField::CloseDate,
            RequiredField::NextStep,
        ],
        PipelineType::Upsell => &[
            RequiredField::Amount,
            RequiredField::CloseDate,
            RequiredField::Products,
        ],
        PipelineType::Renewal => &[
            RequiredField::Amount,
            RequiredField::ContractEnd,
            RequiredField::NextStep,
        ],
        PipelineType::AccountManagement => &[RequiredField::ContractEnd, RequiredField::Owner],
    }
}

/// One required field the record left empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingField {
    pub field: RequiredField,
    pub label: String,
}

/// Result of evaluating one record against its pipeline's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HygieneEvaluation {
    pub is_compliant: bool,
    pub missing_fields: Vec<MissingField>,
}

impl HygieneEvaluation {
    /// Unordered label set used for external-task idempotency.
    pub fn signature(&self) -> BTreeSet<String> {
        self.missing_fields
            .iter()
            .map(|f| f.label.clone())
            .collect()
    }
}

/// Evaluate a record against a pipeline's policy. Missing fields come back
/// in the policy's declared order.
pub fn evaluate(pipeline: PipelineType, record: &Record) -> HygieneEvaluation {
    let missing_fields: Vec<MissingField> = required_fields(pipeline)
        .iter()
        .filter(|field| field.is_missing(record))
        .map(|field| MissingField {
            field: *field,
            label: field.label().to_string(),
        })
        .collect();

    HygieneEvaluation {
        is_compliant: missing_fields.is_empty(),
        missing_fields,
    }
}

/// Evaluate a record against its own pipeline's policy.
pub fn evaluate_record(record: &Record) -> HygieneEvaluation {
    evaluate(record.pipeline, record)
}
