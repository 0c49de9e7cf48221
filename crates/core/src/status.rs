use serde::{Deserialize, Serialize};

use crate::models::{CalculationMethod, ComplianceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Caution,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Caution => "caution",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    ApproachingLimit,
    NearLimit,
    LimitReached,
    Overstay,
    OutsideVisaValidity,
    VisitExceedsAllowance,
    PreExistingOverstay,
    TripExceedsLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceWarning {
    pub code: WarningCode,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub severity: Severity,
    pub warnings: Vec<ComplianceWarning>,
    pub recommendations: Vec<String>,
}

/// `<60%` none, `[60, 80)` caution, `[80, 95)` warning, `>=95%` or any breach critical.
pub fn severity_for(status: &ComplianceStatus) -> Severity {
    if !status.is_compliant {
        return Severity::Critical;
    }

    let used = status.utilization_percent();
    if used >= 95.0 {
        Severity::Critical
    } else if used >= 80.0 {
        Severity::Warning
    } else if used >= 60.0 {
        Severity::Caution
    } else {
        Severity::None
    }
}

/// Fixed advice keyed by severity and calculation method.
pub fn recommendation_for(severity: Severity, method: CalculationMethod) -> Option<&'static str> {
    use CalculationMethod as M;

    let text = match (severity, method) {
        (Severity::None, _) => return None,
        (Severity::Caution, M::RollingWindow) => {
            "Over 60% of the rolling allowance is used; check older days leaving the window before planning a long trip."
        }
        (Severity::Caution, M::CalendarYear) => {
            "Over 60% of this year's allowance is used; keep remaining trips short until the calendar year resets."
        }
        (Severity::Caution, M::EntryBased | M::PerEntry) => {
            "The current stay has used over 60% of the per-stay limit; confirm your exit date."
        }
        (Severity::Caution, M::VisaValidity) => {
            "Over 60% of the stay permitted by this visa is used; confirm your exit date against the visa expiry."
        }
        (Severity::Caution, M::Custom) => {
            "Over 60% of the allowance under this country's rule is used; review the local rule before extending."
        }
        (Severity::Warning, M::RollingWindow) => {
            "Over 80% of the rolling allowance is used; plan an exit and avoid new entries until days free up."
        }
        (Severity::Warning, M::CalendarYear) => {
            "Over 80% of this year's allowance is used; postpone further trips to next calendar year."
        }
        (Severity::Warning, M::EntryBased | M::PerEntry) => {
            "The current stay is close to the per-stay limit; book your departure now."
        }
        (Severity::Warning, M::VisaValidity) => {
            "This stay is close to the visa's limit; arrange departure or an extension before it expires."
        }
        (Severity::Warning, M::Custom) => {
            "Usage is close to the limit under this country's rule; seek local guidance before extending."
        }
        (Severity::Critical, M::RollingWindow) => {
            "The rolling allowance is exhausted or nearly so; leave the area and do not re-enter until days free up."
        }
        (Severity::Critical, M::CalendarYear) => {
            "This year's allowance is exhausted or nearly so; leave and do not return before January 1."
        }
        (Severity::Critical, M::EntryBased | M::PerEntry) => {
            "The per-stay limit is reached or exceeded; depart immediately to avoid overstay penalties."
        }
        (Severity::Critical, M::VisaValidity) => {
            "The visa no longer covers this stay; depart immediately or contact immigration authorities."
        }
        (Severity::Critical, M::Custom) => {
            "The limit under this country's rule is reached or exceeded; contact immigration authorities."
        }
    };
    Some(text)
}

/// Tiered warnings and recommendations for one evaluated policy.
pub fn build_report(status: &ComplianceStatus, country_code: Option<&str>) -> StatusReport {
    let severity = severity_for(status);
    let mut warnings = Vec::new();

    if let Some(warning) = threshold_warning(status, severity, country_code) {
        warnings.push(warning);
    }

    let recommendations = recommendation_for(severity, status.calculation_method)
        .map(|text| vec![text.to_string()])
        .unwrap_or_default();

    StatusReport {
        severity,
        warnings,
        recommendations,
    }
}

fn threshold_warning(
    status: &ComplianceStatus,
    severity: Severity,
    country_code: Option<&str>,
) -> Option<ComplianceWarning> {
    let scope = country_code.unwrap_or("this destination");
    let (code, message, excess_days) = if !status.is_compliant {
        if status.calculation_method == CalculationMethod::VisaValidity
            && status.used_days <= status.max_days
        {
            (
                WarningCode::OutsideVisaValidity,
                format!("{scope}: {} is outside the visa validity period", status.as_of_date),
                None,
            )
        } else {
            let excess = status.used_days - status.max_days;
            (
                WarningCode::Overstay,
                format!(
                    "{scope}: {} days used against a limit of {}, exceeded by {excess} days",
                    status.used_days, status.max_days
                ),
                Some(excess),
            )
        }
    } else {
        let code = match severity {
            Severity::None => return None,
            Severity::Caution => WarningCode::ApproachingLimit,
            Severity::Warning => WarningCode::NearLimit,
            Severity::Critical => WarningCode::LimitReached,
        };
        (
            code,
            format!(
                "{scope}: {} of {} days used, {} remaining",
                status.used_days, status.max_days, status.remaining_days
            ),
            None,
        )
    };

    Some(ComplianceWarning {
        code,
        severity,
        country_code: country_code.map(ToString::to_string),
        message,
        excess_days,
    })
}
