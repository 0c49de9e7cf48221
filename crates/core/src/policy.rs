use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::error::ComplianceError;
use crate::models::{CalculationMethod, ComplianceStatus, StayPolicy, VisitRecord, WILDCARD};
use crate::window::{days_in_range, presence_spans, window_bounds, DaySpan};

/// Inputs handed to a custom evaluation strategy.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Visits already scoped to the policy's country or zone.
    pub visits: &'a [VisitRecord],
    pub policy: &'a StayPolicy,
    pub as_of: NaiveDate,
    /// Set when the caller supplies usage directly instead of visits.
    pub used_days: Option<i64>,
}

/// Strategy behind `CalculationMethod::Custom`, registered per policy id.
pub trait CustomEvaluator: Send + Sync {
    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<ComplianceStatus, ComplianceError>;
}

impl<F> CustomEvaluator for F
where
    F: Fn(&EvaluationContext<'_>) -> Result<ComplianceStatus, ComplianceError> + Send + Sync,
{
    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<ComplianceStatus, ComplianceError> {
        self(ctx)
    }
}

/// Read-only stay policy reference data, loaded once by the caller.
///
/// Only built through [`new`](Self::new) or [`from_json_str`](Self::from_json_str),
/// so every entry is validated and its keys normalised.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: Vec<StayPolicy>,
    default_policy: Option<StayPolicy>,
}

impl PolicyTable {
    pub fn new(
        policies: Vec<StayPolicy>,
        default_policy: Option<StayPolicy>,
    ) -> Result<Self, ComplianceError> {
        for policy in policies.iter().chain(default_policy.iter()) {
            policy.validate()?;
        }

        let policies = policies
            .into_iter()
            .map(|mut policy| {
                policy.country_code = policy.country_code.trim().to_ascii_uppercase();
                policy.visa_type = policy.visa_type.trim().to_lowercase();
                policy
            })
            .collect();

        Ok(Self {
            policies,
            default_policy,
        })
    }

    /// Parses a JSON array of policies.
    pub fn from_json_str(
        json: &str,
        default_policy: Option<StayPolicy>,
    ) -> Result<Self, ComplianceError> {
        let policies: Vec<StayPolicy> = serde_json::from_str(json)?;
        Self::new(policies, default_policy)
    }

    pub fn with_default(default_policy: StayPolicy) -> Self {
        Self {
            policies: Vec::new(),
            default_policy: Some(default_policy),
        }
    }

    pub fn policies(&self) -> &[StayPolicy] {
        &self.policies
    }

    pub fn default_policy(&self) -> Option<&StayPolicy> {
        self.default_policy.as_ref()
    }

    /// Exact `(country, visa_type)` match, then the country's wildcard entry.
    pub fn find(&self, country_code: &str, visa_type: &str) -> Option<&StayPolicy> {
        let country = country_code.trim().to_ascii_uppercase();
        let visa = visa_type.trim().to_lowercase();

        self.policies
            .iter()
            .find(|p| p.country_code == country && p.visa_type == visa)
            .or_else(|| {
                self.policies
                    .iter()
                    .find(|p| p.country_code == country && p.visa_type == WILDCARD)
            })
    }

    /// Like [`find`](Self::find), falling back to the configured default.
    pub fn resolve(&self, country_code: &str, visa_type: &str) -> Result<&StayPolicy, ComplianceError> {
        self.find(country_code, visa_type)
            .or(self.default_policy.as_ref())
            .ok_or_else(|| ComplianceError::PolicyNotFound {
                country_code: country_code.trim().to_ascii_uppercase(),
                visa_type: visa_type.trim().to_lowercase(),
            })
    }
}

/// Dispatches evaluation over the closed set of calculation methods.
#[derive(Clone, Default)]
pub struct PolicyEngine {
    custom: HashMap<String, Arc<dyn CustomEvaluator>>,
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids = self.custom.keys().collect::<Vec<_>>();
        ids.sort();
        f.debug_struct("PolicyEngine")
            .field("custom_evaluators", &ids)
            .finish()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_custom_evaluator(
        mut self,
        policy_id: impl Into<String>,
        evaluator: impl CustomEvaluator + 'static,
    ) -> Self {
        self.custom.insert(policy_id.into(), Arc::new(evaluator));
        self
    }

    /// Evaluates visits already scoped to the policy's country or zone.
    pub fn evaluate(
        &self,
        visits: &[VisitRecord],
        policy: &StayPolicy,
        as_of: NaiveDate,
    ) -> Result<ComplianceStatus, ComplianceError> {
        let status = match policy.calculation_method {
            CalculationMethod::RollingWindow => {
                let (start, end) = window_bounds(as_of, rolling_period(policy)?)?;
                let used = days_in_range(visits, start, end, as_of);
                ComplianceStatus::from_usage(policy, used, start, end, as_of)
            }
            CalculationMethod::CalendarYear => {
                let (start, end) = calendar_year(as_of);
                let used = days_in_range(visits, start, end, as_of);
                ComplianceStatus::from_usage(policy, used, start, end, as_of)
            }
            CalculationMethod::EntryBased => {
                let stay = presence_spans(visits, as_of).last().copied();
                stay_status(policy, stay, as_of)
            }
            CalculationMethod::PerEntry => {
                let stay = latest_entry(visits, as_of);
                stay_status(policy, stay, as_of)
            }
            CalculationMethod::VisaValidity => {
                let stay = presence_spans(visits, as_of).last().copied();
                let used = stay.map(|span| span.days()).unwrap_or(0);
                validity_status(policy, used, as_of)
            }
            CalculationMethod::Custom => self.evaluate_custom(&EvaluationContext {
                visits,
                policy,
                as_of,
                used_days: None,
            })?,
        };

        debug!(
            policy_id = %policy.id,
            method = policy.calculation_method.as_code(),
            used_days = status.used_days,
            compliant = status.is_compliant,
            "policy evaluated"
        );
        Ok(status)
    }

    /// Evaluates a known usage figure against a policy, without visits.
    pub fn evaluate_usage(
        &self,
        policy: &StayPolicy,
        used_days: i64,
        as_of: NaiveDate,
    ) -> Result<ComplianceStatus, ComplianceError> {
        let status = match policy.calculation_method {
            CalculationMethod::RollingWindow => {
                let (start, end) = window_bounds(as_of, rolling_period(policy)?)?;
                ComplianceStatus::from_usage(policy, used_days, start, end, as_of)
            }
            CalculationMethod::CalendarYear => {
                let (start, end) = calendar_year(as_of);
                ComplianceStatus::from_usage(policy, used_days, start, end, as_of)
            }
            CalculationMethod::EntryBased | CalculationMethod::PerEntry => {
                ComplianceStatus::from_usage(policy, used_days, as_of, as_of, as_of)
            }
            CalculationMethod::VisaValidity => validity_status(policy, used_days, as_of),
            CalculationMethod::Custom => self.evaluate_custom(&EvaluationContext {
                visits: &[],
                policy,
                as_of,
                used_days: Some(used_days),
            })?,
        };
        Ok(status)
    }

    fn evaluate_custom(
        &self,
        ctx: &EvaluationContext<'_>,
    ) -> Result<ComplianceStatus, ComplianceError> {
        let evaluator = self.custom.get(&ctx.policy.id).ok_or_else(|| {
            ComplianceError::CustomEvaluatorMissing {
                policy_id: ctx.policy.id.clone(),
            }
        })?;
        evaluator.evaluate(ctx)
    }
}

fn rolling_period(policy: &StayPolicy) -> Result<i64, ComplianceError> {
    policy
        .period_days
        .map(i64::from)
        .ok_or_else(|| ComplianceError::InvalidPolicy {
            policy_id: policy.id.clone(),
            reason: "rolling_window requires period_days".to_string(),
        })
}

fn calendar_year(as_of: NaiveDate) -> (NaiveDate, NaiveDate) {
    let year = as_of.year();
    let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(as_of);
    let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(as_of);
    (start, end)
}

/// Most recent single record that has started by `as_of`, clipped to it.
fn latest_entry(visits: &[VisitRecord], as_of: NaiveDate) -> Option<DaySpan> {
    visits
        .iter()
        .filter(|visit| visit.interval.start <= as_of)
        .max_by(|a, b| {
            a.interval
                .start
                .cmp(&b.interval.start)
                .then_with(|| a.interval.resolved_end(as_of).cmp(&b.interval.resolved_end(as_of)))
        })
        .map(|visit| DaySpan::new(visit.interval.start, visit.interval.resolved_end(as_of).min(as_of)))
}

fn stay_status(policy: &StayPolicy, stay: Option<DaySpan>, as_of: NaiveDate) -> ComplianceStatus {
    match stay {
        Some(span) => ComplianceStatus::from_usage(policy, span.days(), span.start, span.end, as_of),
        None => ComplianceStatus::from_usage(policy, 0, as_of, as_of, as_of),
    }
}

fn validity_status(policy: &StayPolicy, used_days: i64, as_of: NaiveDate) -> ComplianceStatus {
    let within_validity = policy.valid_from.map_or(true, |from| as_of >= from)
        && policy.valid_until.map_or(true, |until| as_of <= until);

    let window_start = policy.valid_from.unwrap_or(as_of).min(as_of);
    let window_end = policy.valid_until.unwrap_or(as_of);
    let mut status =
        ComplianceStatus::from_usage(policy, used_days, window_start, window_end, as_of);

    if within_validity {
        if let Some(until) = policy.valid_until {
            let validity_left = (until - as_of).num_days();
            status.remaining_days = status.remaining_days.min(validity_left);
        }
    } else {
        status.is_compliant = false;
        status.remaining_days = status.remaining_days.min(0);
    }
    status
}
