//! Forward simulation of planned trips.
//!
//! A planned trip is appended to the existing visits and the policy is
//! re-evaluated on the entry day and on the exit day, plus each December 31
//! the trip crosses under a calendar-year rule. The strictest of these
//! decides. Existing visits alone, evaluated on the entry day, tell whether
//! an overstay predates the trip.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::error::ComplianceError;
use crate::models::{
    shift_days, CalculationMethod, ComplianceStatus, DateInterval, PlannedTrip, StayPolicy,
    VisitRecord, DEFAULT_VISA_TYPE,
};
use crate::policy::PolicyEngine;
use crate::status::{build_report, severity_for, ComplianceWarning, Severity, WarningCode};

const MAX_STAY_SEARCH_DAYS: i64 = 366;

#[derive(Debug, Clone, Serialize)]
pub struct TripAssessment {
    pub can_travel: bool,
    pub warnings: Vec<ComplianceWarning>,
    pub projected_used_days: i64,
    pub remaining_after_trip: i64,
    pub excess_days: i64,
    pub decisive_date: NaiveDate,
    pub status_at_entry: ComplianceStatus,
    pub status_at_exit: ComplianceStatus,
}

/// Validates a trip that starts on or after `now`. `existing` must already be
/// scoped to the trip's country or zone.
pub fn validate_future_trip(
    engine: &PolicyEngine,
    existing: &[VisitRecord],
    trip: &PlannedTrip,
    policy: &StayPolicy,
    now: NaiveDate,
) -> Result<TripAssessment, ComplianceError> {
    if trip.start < now {
        return Err(ComplianceError::TripNotInFuture {
            start: trip.start,
            now,
        });
    }
    assess_trip(engine, existing, &trip.as_record()?, policy)
}

fn assess_trip(
    engine: &PolicyEngine,
    existing: &[VisitRecord],
    candidate: &VisitRecord,
    policy: &StayPolicy,
) -> Result<TripAssessment, ComplianceError> {
    let entry = candidate.interval.start;
    let exit = candidate.interval.resolved_end(entry);

    let mut combined = existing.to_vec();
    combined.push(candidate.clone());

    let before_trip = prior_overstay(engine, existing, policy, entry)?;
    let at_entry = engine.evaluate(&combined, policy, entry)?;
    let at_exit = engine.evaluate(&combined, policy, exit)?;

    let mut peak = at_exit.clone();
    for checkpoint in year_ends(policy, entry, exit) {
        let status = engine.evaluate(&combined, policy, checkpoint)?;
        if more_restrictive(&status, &peak) {
            peak = status;
        }
    }

    let decisive = if more_restrictive(&at_entry, &peak) {
        &at_entry
    } else {
        &peak
    };

    let mut warnings = Vec::new();
    let country = candidate.country_code.as_str();

    if let Some(before_trip) = &before_trip {
        let excess = before_trip.used_days - before_trip.max_days;
        warnings.push(ComplianceWarning {
            code: WarningCode::PreExistingOverstay,
            severity: Severity::Critical,
            country_code: Some(country.to_string()),
            message: format!(
                "{country}: already over the limit on entry {entry}: {} of {} days used, exceeded by {excess} days",
                before_trip.used_days, before_trip.max_days
            ),
            excess_days: Some(excess.max(0)),
        });
    }

    if !decisive.is_compliant && decisive.used_days <= decisive.max_days {
        warnings.push(ComplianceWarning {
            code: WarningCode::OutsideVisaValidity,
            severity: Severity::Critical,
            country_code: Some(country.to_string()),
            message: format!(
                "{country}: {} falls outside the visa validity period",
                decisive.as_of_date
            ),
            excess_days: None,
        });
    } else if !decisive.is_compliant {
        let excess = decisive.used_days - decisive.max_days;
        warnings.push(ComplianceWarning {
            code: WarningCode::TripExceedsLimit,
            severity: Severity::Critical,
            country_code: Some(country.to_string()),
            message: format!(
                "{country}: trip reaches {} days on {} against a limit of {}, exceeding it by {excess} days",
                decisive.used_days, decisive.as_of_date, decisive.max_days
            ),
            excess_days: Some(excess.max(0)),
        });
    }

    if warnings.is_empty() && severity_for(decisive) > Severity::None {
        warnings.extend(build_report(decisive, Some(country)).warnings);
    }

    let can_travel = at_entry.is_compliant && peak.is_compliant;
    let excess_days = (decisive.used_days - decisive.max_days).max(0);

    debug!(
        country = %country,
        %entry,
        %exit,
        projected = decisive.used_days,
        can_travel,
        "planned trip assessed"
    );

    Ok(TripAssessment {
        can_travel,
        warnings,
        projected_used_days: decisive.used_days,
        remaining_after_trip: decisive.remaining_days,
        excess_days,
        decisive_date: decisive.as_of_date,
        status_at_entry: at_entry.clone(),
        status_at_exit: at_exit,
    })
}

/// Status of the existing visits alone on `entry`, when they already breach
/// the policy. Stay-scoped methods only count a stay still running the day
/// before entry; a finished stay is history, not an overstay carried in.
fn prior_overstay(
    engine: &PolicyEngine,
    existing: &[VisitRecord],
    policy: &StayPolicy,
    entry: NaiveDate,
) -> Result<Option<ComplianceStatus>, ComplianceError> {
    let stay_scoped = matches!(
        policy.calculation_method,
        CalculationMethod::EntryBased | CalculationMethod::PerEntry | CalculationMethod::VisaValidity
    );
    if stay_scoped {
        let day_before = shift_days(entry, -1);
        if !existing
            .iter()
            .any(|visit| visit.interval.contains(day_before, entry))
        {
            return Ok(None);
        }
    }

    let status = engine.evaluate(existing, policy, entry)?;
    Ok((!status.is_compliant).then_some(status))
}

/// Calendar-year usage resets on January 1, so a trip spanning New Year
/// peaks on December 31 of every year it leaves.
fn year_ends(policy: &StayPolicy, entry: NaiveDate, exit: NaiveDate) -> Vec<NaiveDate> {
    if policy.calculation_method != CalculationMethod::CalendarYear {
        return Vec::new();
    }
    (entry.year()..exit.year())
        .filter_map(|year| NaiveDate::from_ymd_opt(year, 12, 31))
        .collect()
}

/// Whether `a` is stricter than `b`; ties go to `b`.
fn more_restrictive(a: &ComplianceStatus, b: &ComplianceStatus) -> bool {
    match (a.is_compliant, b.is_compliant) {
        (false, true) => true,
        (true, false) => false,
        _ => a.remaining_days < b.remaining_days,
    }
}

/// First entry date on or after `from`, within `horizon_days`, from which a
/// `duration_days` trip is compliant end to end.
pub fn earliest_entry_date(
    engine: &PolicyEngine,
    existing: &[VisitRecord],
    country_code: &str,
    duration_days: i64,
    policy: &StayPolicy,
    from: NaiveDate,
    horizon_days: i64,
) -> Result<Option<NaiveDate>, ComplianceError> {
    if duration_days <= 0 {
        return Err(ComplianceError::InvalidWindow {
            days: duration_days,
        });
    }

    for offset in 0..=horizon_days.max(0) {
        let start = shift_days(from, offset);
        let candidate = probe(country_code, start, duration_days)?;
        if assess_trip(engine, existing, &candidate, policy)?.can_travel {
            return Ok(Some(start));
        }
    }
    Ok(None)
}

/// Longest compliant trip, in days, that enters on `entry`. Zero when even a
/// single day would breach the policy. Searches at most `MAX_STAY_SEARCH_DAYS`.
pub fn max_stay_from(
    engine: &PolicyEngine,
    existing: &[VisitRecord],
    country_code: &str,
    entry: NaiveDate,
    policy: &StayPolicy,
) -> Result<i64, ComplianceError> {
    let cap = match policy.day_limit() {
        limit if limit > 0 => limit.min(MAX_STAY_SEARCH_DAYS),
        _ => MAX_STAY_SEARCH_DAYS,
    };

    // A shorter trip never uses more days than a longer one from the same
    // entry, so the compliant lengths form a prefix of 1..=cap.
    let (mut low, mut high) = (0, cap);
    while low < high {
        let mid = low + (high - low + 1) / 2;
        let candidate = probe(country_code, entry, mid)?;
        if assess_trip(engine, existing, &candidate, policy)?.can_travel {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    Ok(low)
}

fn probe(country_code: &str, start: NaiveDate, days: i64) -> Result<VisitRecord, ComplianceError> {
    let interval = DateInterval::closed(start, shift_days(start, days - 1))?;
    Ok(VisitRecord::new("probe", country_code, interval, DEFAULT_VISA_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn stay(id: &str, start: NaiveDate, end: NaiveDate) -> VisitRecord {
        VisitRecord::new(id, "FR", DateInterval::closed(start, end).unwrap(), "visa_free")
    }

    fn trip(start: NaiveDate, end: NaiveDate) -> PlannedTrip {
        PlannedTrip {
            country_code: "FR".to_string(),
            visa_type: "visa_free".to_string(),
            start,
            end,
        }
    }

    /// 85 days: 2024-01-01 through 2024-03-25.
    fn eighty_five_days() -> Vec<VisitRecord> {
        vec![stay("a", d(2024, 1, 1), d(2024, 3, 25))]
    }

    #[test]
    fn rejects_trip_in_the_past() {
        let err = validate_future_trip(
            &PolicyEngine::new(),
            &[],
            &trip(d(2024, 1, 1), d(2024, 1, 5)),
            &StayPolicy::default_rolling(),
            d(2024, 2, 1),
        )
        .unwrap_err();
        assert!(matches!(err, ComplianceError::TripNotInFuture { .. }));
    }

    #[test]
    fn ten_day_trip_after_85_days_exceeds_by_five() {
        let assessment = validate_future_trip(
            &PolicyEngine::new(),
            &eighty_five_days(),
            &trip(d(2024, 4, 1), d(2024, 4, 10)),
            &StayPolicy::default_rolling(),
            d(2024, 3, 28),
        )
        .unwrap();

        assert!(!assessment.can_travel);
        assert_eq!(assessment.projected_used_days, 95);
        assert_eq!(assessment.excess_days, 5);
        assert_eq!(assessment.decisive_date, d(2024, 4, 10));
        let warning = &assessment.warnings[0];
        assert_eq!(warning.code, WarningCode::TripExceedsLimit);
        assert_eq!(warning.excess_days, Some(5));
        assert!(warning.message.contains("by 5 days"));
    }

    #[test]
    fn five_day_trip_after_85_days_fits_exactly() {
        let assessment = validate_future_trip(
            &PolicyEngine::new(),
            &eighty_five_days(),
            &trip(d(2024, 4, 1), d(2024, 4, 5)),
            &StayPolicy::default_rolling(),
            d(2024, 3, 28),
        )
        .unwrap();
        assert!(assessment.can_travel);
        assert_eq!(assessment.projected_used_days, 90);
        assert_eq!(assessment.remaining_after_trip, 0);
        assert_eq!(assessment.warnings[0].code, WarningCode::LimitReached);
    }

    #[test]
    fn flags_overstay_that_exists_before_the_trip() {
        let existing = vec![stay("long", d(2024, 1, 1), d(2024, 4, 5))];
        let assessment = validate_future_trip(
            &PolicyEngine::new(),
            &existing,
            &trip(d(2024, 4, 10), d(2024, 4, 11)),
            &StayPolicy::default_rolling(),
            d(2024, 4, 6),
        )
        .unwrap();
        assert!(!assessment.can_travel);
        assert!(assessment
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::PreExistingOverstay));
    }

    #[test]
    fn earliest_entry_waits_for_days_to_leave_the_window() {
        let engine = PolicyEngine::new();
        let existing = vec![stay("full", d(2024, 1, 1), d(2024, 3, 30))];
        let first = earliest_entry_date(
            &engine,
            &existing,
            "FR",
            10,
            &StayPolicy::default_rolling(),
            d(2024, 4, 1),
            365,
        )
        .unwrap()
        .unwrap();

        // The window ending on the trip's last day must hold at most 80 days
        // of the January-March stay.
        assert_eq!(first, d(2024, 6, 29));
        let assessment = assess_trip(
            &engine,
            &existing,
            &probe("FR", first, 10).unwrap(),
            &StayPolicy::default_rolling(),
        )
        .unwrap();
        assert!(assessment.can_travel);
        let day_before = assess_trip(
            &engine,
            &existing,
            &probe("FR", d(2024, 6, 28), 10).unwrap(),
            &StayPolicy::default_rolling(),
        )
        .unwrap();
        assert!(!day_before.can_travel);
    }

    #[test]
    fn max_stay_is_remaining_allowance_for_fresh_window() {
        let stay_days = max_stay_from(
            &PolicyEngine::new(),
            &eighty_five_days(),
            "FR",
            d(2024, 4, 1),
            &StayPolicy::default_rolling(),
        )
        .unwrap();
        assert_eq!(stay_days, 5);
    }

    #[test]
    fn calendar_year_trip_is_checked_on_december_31() {
        let rule = StayPolicy {
            id: "ae-visit".to_string(),
            calculation_method: CalculationMethod::CalendarYear,
            max_days_per_stay: 90,
            max_days_per_period: Some(180),
            period_days: None,
            ..StayPolicy::default_rolling()
        };
        // 175 days of 2024 already used.
        let existing = vec![stay("spring", d(2024, 1, 1), d(2024, 6, 23))];

        let assessment = validate_future_trip(
            &PolicyEngine::new(),
            &existing,
            &trip(d(2024, 12, 20), d(2025, 1, 10)),
            &rule,
            d(2024, 12, 1),
        )
        .unwrap();

        assert!(!assessment.can_travel);
        assert_eq!(assessment.decisive_date, d(2024, 12, 31));
        assert_eq!(assessment.projected_used_days, 187);
        assert_eq!(assessment.excess_days, 7);
        assert_eq!(assessment.status_at_exit.used_days, 10);

        let longest =
            max_stay_from(&PolicyEngine::new(), &existing, "FR", d(2024, 12, 20), &rule).unwrap();
        assert_eq!(longest, 5);
    }

    #[test]
    fn stay_at_the_limit_is_not_a_prior_overstay() {
        // 90 days, compliant until the planned trip adds one more.
        let existing = vec![stay("full", d(2024, 1, 1), d(2024, 3, 30))];
        let assessment = validate_future_trip(
            &PolicyEngine::new(),
            &existing,
            &trip(d(2024, 4, 1), d(2024, 4, 1)),
            &StayPolicy::default_rolling(),
            d(2024, 3, 31),
        )
        .unwrap();

        assert!(!assessment.can_travel);
        assert!(assessment
            .warnings
            .iter()
            .all(|w| w.code != WarningCode::PreExistingOverstay));
        let warning = &assessment.warnings[0];
        assert_eq!(warning.code, WarningCode::TripExceedsLimit);
        assert_eq!(warning.excess_days, Some(1));
    }

    #[test]
    fn trip_outliving_the_visa_is_refused() {
        let rule = StayPolicy {
            id: "tourist-visa".to_string(),
            calculation_method: CalculationMethod::VisaValidity,
            max_days_per_stay: 30,
            max_days_per_period: None,
            period_days: None,
            valid_from: Some(d(2024, 1, 1)),
            valid_until: Some(d(2024, 6, 30)),
            ..StayPolicy::default_rolling()
        };
        let assessment = validate_future_trip(
            &PolicyEngine::new(),
            &[],
            &trip(d(2024, 6, 25), d(2024, 7, 2)),
            &rule,
            d(2024, 6, 1),
        )
        .unwrap();

        assert!(!assessment.can_travel);
        assert!(assessment.status_at_entry.is_compliant);
        assert_eq!(assessment.excess_days, 0);
        assert_eq!(assessment.warnings.len(), 1);
        assert_eq!(assessment.warnings[0].code, WarningCode::OutsideVisaValidity);
    }

    #[test]
    fn max_stay_search_is_bounded_for_huge_limits() {
        let rule = StayPolicy {
            id: "open-ended".to_string(),
            calculation_method: CalculationMethod::PerEntry,
            max_days_per_stay: u32::MAX,
            max_days_per_period: None,
            period_days: None,
            ..StayPolicy::default_rolling()
        };
        let longest =
            max_stay_from(&PolicyEngine::new(), &[], "FR", d(2024, 1, 1), &rule).unwrap();
        assert_eq!(longest, MAX_STAY_SEARCH_DAYS);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = earliest_entry_date(
            &PolicyEngine::new(),
            &[],
            "FR",
            0,
            &StayPolicy::default_rolling(),
            d(2024, 1, 1),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, ComplianceError::InvalidWindow { days: 0 }));
    }
}
