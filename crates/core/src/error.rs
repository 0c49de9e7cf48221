//! Error taxonomy for the compliance engine.
//!
//! Every failure is synchronous and deterministic. Nothing here is retried and
//! no variant carries a partial result.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComplianceError {
    /// Exit date precedes entry date. Rejected, never corrected.
    #[error("visit {id}: exit date {exit} precedes entry date {entry}")]
    InvalidInterval {
        id: String,
        entry: NaiveDate,
        exit: NaiveDate,
    },

    #[error("visit {id}: {field} `{value}` is not a YYYY-MM-DD date")]
    InvalidDate {
        id: String,
        field: &'static str,
        value: String,
    },

    #[error("visit {id}: missing required field {field}")]
    MissingField { id: String, field: &'static str },

    /// No policy matches and no default is configured.
    #[error("no stay policy for country {country_code} / visa type {visa_type}")]
    PolicyNotFound {
        country_code: String,
        visa_type: String,
    },

    #[error("window length must be positive, got {days} days")]
    InvalidWindow { days: i64 },

    #[error("policy {policy_id} uses the custom method but no evaluator is registered")]
    CustomEvaluatorMissing { policy_id: String },

    #[error("planned trip starting {start} is not in the future relative to {now}")]
    TripNotInFuture { start: NaiveDate, now: NaiveDate },

    #[error("policy {policy_id} is invalid: {reason}")]
    InvalidPolicy { policy_id: String, reason: String },

    #[error("policy table could not be parsed: {0}")]
    PolicyTableParse(#[from] serde_json::Error),
}

impl ComplianceError {
    /// Stable machine-readable code for callers mapping errors onto their own surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInterval { .. } => "invalid_interval",
            Self::InvalidDate { .. } => "invalid_date",
            Self::MissingField { .. } => "missing_field",
            Self::PolicyNotFound { .. } => "policy_not_found",
            Self::InvalidWindow { .. } => "invalid_window",
            Self::CustomEvaluatorMissing { .. } => "custom_evaluator_missing",
            Self::TripNotInFuture { .. } => "trip_not_in_future",
            Self::InvalidPolicy { .. } => "invalid_policy",
            Self::PolicyTableParse(_) => "policy_table_parse",
        }
    }
}
