use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ComplianceError;

pub const DEFAULT_VISA_TYPE: &str = "visa_free";
pub const WILDCARD: &str = "*";

/// Inclusive date range. An absent `end` means the stay is still ongoing and
/// is resolved against the as-of date only when it is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateInterval {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Result<Self, ComplianceError> {
        if let Some(end) = end {
            if end < start {
                return Err(ComplianceError::InvalidInterval {
                    id: String::new(),
                    entry: start,
                    exit: end,
                });
            }
        }
        Ok(Self { start, end })
    }

    pub fn closed(start: NaiveDate, end: NaiveDate) -> Result<Self, ComplianceError> {
        Self::new(start, Some(end))
    }

    pub fn open(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn resolved_end(&self, as_of: NaiveDate) -> NaiveDate {
        self.end.unwrap_or(as_of)
    }

    /// Inclusive length in days, zero when an open stay has not started by `as_of`.
    pub fn length_days(&self, as_of: NaiveDate) -> i64 {
        let end = self.resolved_end(as_of);
        if end < self.start {
            0
        } else {
            inclusive_days(self.start, end)
        }
    }

    pub fn contains(&self, date: NaiveDate, as_of: NaiveDate) -> bool {
        self.start <= date && date <= self.resolved_end(as_of)
    }
}

/// Number of calendar days in `[start, end]`, counting both ends.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

pub fn shift_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days))
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}

/// Visit as delivered by the visit store, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVisit {
    pub id: String,
    pub country: String,
    pub entry_date: String,
    #[serde(default)]
    pub exit_date: Option<String>,
    #[serde(default)]
    pub visa_type: Option<String>,
    #[serde(default)]
    pub max_days: Option<u32>,
}

/// Validated visit with a canonical interval. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub id: String,
    pub country_code: String,
    pub interval: DateInterval,
    pub visa_type: String,
    #[serde(default)]
    pub source_policy_id: Option<String>,
    #[serde(default)]
    pub max_days: Option<u32>,
}

impl VisitRecord {
    pub fn new(
        id: impl Into<String>,
        country_code: impl Into<String>,
        interval: DateInterval,
        visa_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            country_code: country_code.into(),
            interval,
            visa_type: visa_type.into(),
            source_policy_id: None,
            max_days: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    RollingWindow,
    CalendarYear,
    EntryBased,
    PerEntry,
    VisaValidity,
    Custom,
}

impl CalculationMethod {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::RollingWindow => "rolling_window",
            Self::CalendarYear => "calendar_year",
            Self::EntryBased => "entry_based",
            Self::PerEntry => "per_entry",
            Self::VisaValidity => "visa_validity",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayPolicy {
    pub id: String,
    pub country_code: String,
    pub visa_type: String,
    pub calculation_method: CalculationMethod,
    pub max_days_per_stay: u32,
    #[serde(default)]
    pub max_days_per_period: Option<u32>,
    #[serde(default)]
    pub period_days: Option<u32>,
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub requires_visa: bool,
    #[serde(default)]
    pub visa_fee_cents: Option<u64>,
    #[serde(default)]
    pub processing_days: Option<u32>,
}

impl StayPolicy {
    /// The system fallback: 90 days in any rolling 180-day window.
    pub fn default_rolling() -> Self {
        Self {
            id: "default-90-180".to_string(),
            country_code: WILDCARD.to_string(),
            visa_type: WILDCARD.to_string(),
            calculation_method: CalculationMethod::RollingWindow,
            max_days_per_stay: 90,
            max_days_per_period: Some(90),
            period_days: Some(180),
            valid_from: None,
            valid_until: None,
            requires_visa: false,
            visa_fee_cents: None,
            processing_days: None,
        }
    }

    /// Day limit the method compares usage against.
    pub fn day_limit(&self) -> i64 {
        match self.calculation_method {
            CalculationMethod::RollingWindow | CalculationMethod::CalendarYear => {
                i64::from(self.max_days_per_period.unwrap_or(self.max_days_per_stay))
            }
            CalculationMethod::EntryBased
            | CalculationMethod::PerEntry
            | CalculationMethod::VisaValidity
            | CalculationMethod::Custom => i64::from(self.max_days_per_stay),
        }
    }

    pub fn validate(&self) -> Result<(), ComplianceError> {
        let invalid = |reason: &str| ComplianceError::InvalidPolicy {
            policy_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.country_code.trim().is_empty() {
            return Err(invalid("country_code must not be empty"));
        }
        if self.calculation_method == CalculationMethod::RollingWindow {
            match self.period_days {
                Some(0) => {
                    return Err(ComplianceError::InvalidWindow { days: 0 });
                }
                None => return Err(invalid("rolling_window requires period_days")),
                Some(_) => {}
            }
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until < from {
                return Err(invalid("valid_until precedes valid_from"));
            }
        }
        Ok(())
    }
}

/// Result of evaluating one policy at one as-of date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceStatus {
    pub used_days: i64,
    pub remaining_days: i64,
    pub is_compliant: bool,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub as_of_date: NaiveDate,
    pub max_days: i64,
    pub calculation_method: CalculationMethod,
    pub policy_id: String,
}

impl ComplianceStatus {
    pub fn from_usage(
        policy: &StayPolicy,
        used_days: i64,
        window_start: NaiveDate,
        window_end: NaiveDate,
        as_of_date: NaiveDate,
    ) -> Self {
        let max_days = policy.day_limit();
        Self {
            used_days,
            remaining_days: max_days - used_days,
            is_compliant: used_days <= max_days,
            window_start,
            window_end,
            as_of_date,
            max_days,
            calculation_method: policy.calculation_method,
            policy_id: policy.id.clone(),
        }
    }

    /// Share of the limit consumed, in percent. A zero limit with any usage is fully used.
    pub fn utilization_percent(&self) -> f64 {
        if self.max_days <= 0 {
            return if self.used_days > 0 { 100.0 } else { 0.0 };
        }
        self.used_days as f64 * 100.0 / self.max_days as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportCandidate {
    pub passport_id: String,
    pub country_code: String,
    #[serde(default)]
    pub applicable_policies: Vec<StayPolicy>,
}

/// A hypothetical trip submitted for validation before booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTrip {
    pub country_code: String,
    #[serde(default = "default_visa_type")]
    pub visa_type: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PlannedTrip {
    pub fn interval(&self) -> Result<DateInterval, ComplianceError> {
        DateInterval::closed(self.start, self.end).map_err(|_| ComplianceError::InvalidInterval {
            id: "planned-trip".to_string(),
            entry: self.start,
            exit: self.end,
        })
    }

    pub fn as_record(&self) -> Result<VisitRecord, ComplianceError> {
        Ok(VisitRecord::new(
            "planned-trip",
            self.country_code.trim().to_ascii_uppercase(),
            self.interval()?,
            self.visa_type.trim().to_ascii_lowercase(),
        ))
    }
}

fn default_visa_type() -> String {
    DEFAULT_VISA_TYPE.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Fail on the first invalid record.
    Strict,
    /// Collect per-record errors and evaluate the rest.
    #[default]
    Tolerant,
}

impl ValidationMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "strict" | "fail-fast" | "fail_fast" => Some(Self::Strict),
            "tolerant" | "lenient" | "collect" => Some(Self::Tolerant),
            _ => None,
        }
    }
}
