use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use staywise_core::{
    AccessTier, CalculationMethod, ComplianceEngine, ComplianceError, ComplianceStatus,
    EngineConfig, EvaluationContext, PassportCandidate, PlannedTrip, PolicyEngine, PolicyTable,
    RankingFactor, RawVisit, Severity, StayPolicy, ValidationMode, WarningCode,
};

fn policy_file() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/policies.json")
}

fn load_table() -> PolicyTable {
    let json = fs::read_to_string(policy_file()).expect("policy file should exist");
    PolicyTable::from_json_str(&json, Some(StayPolicy::default_rolling()))
        .expect("policy file should parse")
}

fn engine() -> ComplianceEngine {
    ComplianceEngine::new(Arc::new(load_table()), EngineConfig::default())
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn visit(id: &str, country: &str, entry: &str, exit: Option<&str>) -> RawVisit {
    RawVisit {
        id: id.to_string(),
        country: country.to_string(),
        entry_date: entry.to_string(),
        exit_date: exit.map(ToString::to_string),
        visa_type: None,
        max_days: None,
    }
}

#[test]
fn policy_file_loads_every_entry() {
    let table = load_table();
    assert_eq!(table.policies().len(), 6);
    assert_eq!(
        table.find("gb", "business").map(|p| p.id.as_str()),
        Some("gb-standard-visitor")
    );
    assert_eq!(
        table.resolve("BR", "visa_free").unwrap().id,
        StayPolicy::default_rolling().id
    );
}

#[test]
fn no_visits_leaves_full_allowance() {
    let status = engine().calculate_schengen_status(&[], d(2024, 6, 1)).unwrap();
    assert_eq!(status.used_days, 0);
    assert_eq!(status.remaining_days, 90);
    assert!(status.is_compliant);
    assert_eq!(status.policy_id, "schengen-short-stay");
}

#[test]
fn thirty_day_visit_inside_window() {
    let visits = vec![visit("v1", "FR", "2024-01-01", Some("2024-01-30"))];
    let status = engine().calculate_schengen_status(&visits, d(2024, 6, 1)).unwrap();
    assert_eq!(status.used_days, 30);
    assert_eq!(status.remaining_days, 60);
    assert!(status.is_compliant);
    assert_eq!(status.window_start, d(2023, 12, 5));
    assert_eq!(status.window_end, d(2024, 6, 1));
}

#[test]
fn exactly_ninety_days_is_compliant() {
    let visits = vec![visit("v1", "DE", "2024-01-01", Some("2024-03-30"))];
    let status = engine().calculate_schengen_status(&visits, d(2024, 4, 15)).unwrap();
    assert_eq!(status.used_days, 90);
    assert_eq!(status.remaining_days, 0);
    assert!(status.is_compliant);
}

#[test]
fn ninety_one_days_is_an_overstay() {
    let visits = vec![visit("v1", "IT", "2024-01-01", Some("2024-03-31"))];
    let status = engine().calculate_schengen_status(&visits, d(2024, 4, 15)).unwrap();
    assert_eq!(status.used_days, 91);
    assert_eq!(status.remaining_days, -1);
    assert!(!status.is_compliant);
}

#[test]
fn planned_trip_past_the_limit_is_refused() {
    let visits = vec![visit("v1", "IT", "2024-01-01", Some("2024-03-25"))];
    let trip = PlannedTrip {
        country_code: "ES".to_string(),
        visa_type: "visa_free".to_string(),
        start: d(2024, 4, 1),
        end: d(2024, 4, 10),
    };

    let assessment = engine()
        .validate_future_trip(&visits, &trip, d(2024, 3, 28))
        .unwrap();

    assert!(!assessment.can_travel);
    assert_eq!(assessment.excess_days, 5);
    let warning = assessment
        .warnings
        .iter()
        .find(|w| w.code == WarningCode::TripExceedsLimit)
        .expect("trip warning");
    assert_eq!(warning.excess_days, Some(5));
    assert!(warning.message.contains("5 days"));
}

#[test]
fn new_year_trip_cannot_hide_an_overstay_in_the_old_year() {
    let visits = vec![visit("spring", "AE", "2024-01-01", Some("2024-06-23"))];
    let trip = PlannedTrip {
        country_code: "ae".to_string(),
        visa_type: "visa_free".to_string(),
        start: d(2024, 12, 20),
        end: d(2025, 1, 10),
    };

    let assessment = engine()
        .validate_future_trip(&visits, &trip, d(2024, 12, 1))
        .unwrap();

    assert!(!assessment.can_travel);
    assert_eq!(assessment.decisive_date, d(2024, 12, 31));
    assert_eq!(assessment.projected_used_days, 187);
    assert_eq!(assessment.excess_days, 7);
}

#[test]
fn visa_free_passport_beats_visa_required() {
    let visa_required = StayPolicy {
        id: "jp-visa-required".to_string(),
        country_code: "JP".to_string(),
        visa_type: "tourist_visa".to_string(),
        calculation_method: CalculationMethod::EntryBased,
        max_days_per_stay: 15,
        max_days_per_period: None,
        period_days: None,
        valid_from: None,
        valid_until: None,
        requires_visa: true,
        visa_fee_cents: Some(3000),
        processing_days: Some(7),
    };
    let passports = vec![
        PassportCandidate {
            passport_id: "in-1".to_string(),
            country_code: "IN".to_string(),
            applicable_policies: vec![visa_required],
        },
        PassportCandidate {
            passport_id: "us-1".to_string(),
            country_code: "US".to_string(),
            applicable_policies: Vec::new(),
        },
    ];
    let used = HashMap::from([("us-1".to_string(), 30)]);

    let comparison = engine()
        .compare_passports(&passports, "jp", &used, d(2024, 6, 1))
        .unwrap();

    assert_eq!(comparison.recommended.as_deref(), Some("us-1"));
    assert_eq!(comparison.deciding_factor, RankingFactor::AccessTier);
    assert_eq!(comparison.explanation, "visa-free vs visa-required");
    assert_eq!(comparison.ranked[0].tier, AccessTier::VisaFreeCompliant);
    assert_eq!(comparison.ranked[0].status.remaining_days, 60);
    assert_eq!(comparison.ranked[1].tier, AccessTier::VisaRequired);
}

#[test]
fn comprehensive_status_reports_each_country_by_its_own_rule() {
    let mut cn = visit("cn", "CN", "2025-01-05", None);
    cn.visa_type = Some("Tourist Visa".to_string());
    let visits = vec![
        visit("fr", "FR", "2024-11-01", Some("2024-11-20")),
        visit("ae", "AE", "2024-12-20", Some("2025-01-03")),
        cn,
    ];

    let result = engine()
        .calculate_comprehensive_status(&visits, d(2025, 1, 10))
        .unwrap();

    assert_eq!(result.status.used_days, 20);
    let scopes = result
        .countries
        .iter()
        .map(|c| c.scope.as_str())
        .collect::<Vec<_>>();
    assert_eq!(scopes, vec!["AE", "CN"]);

    // Calendar-year count restarts on January 1.
    assert_eq!(result.countries[0].status.used_days, 3);

    let china = &result.countries[1];
    assert_eq!(china.visa_type, "tourist_visa");
    assert!(!china.status.is_compliant);
    assert_eq!(china.report.warnings[0].code, WarningCode::OutsideVisaValidity);
    assert_eq!(result.severity, Severity::Critical);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"]["used_days"], 20);
    assert_eq!(json["countries"][1]["status"]["calculation_method"], "visa_validity");
}

#[test]
fn wildcard_visa_entry_covers_any_visa_type() {
    let mut stay = visit("gb", "gb", "2024-01-01", Some("2024-06-30"));
    stay.visa_type = Some("business".to_string());

    let report = engine().check_overstay_warnings(&[stay], d(2024, 7, 1)).unwrap();
    let warning = report
        .warnings
        .iter()
        .find(|w| w.country_code.as_deref() == Some("GB"))
        .expect("gb warning");
    assert_eq!(warning.code, WarningCode::Overstay);
    assert_eq!(warning.excess_days, Some(2));
    assert!(report.schengen_warnings.is_empty());
}

#[test]
fn tolerant_mode_skips_malformed_rows() {
    let visits = vec![
        visit("ok", "FR", "2024-01-01", Some("2024-01-10")),
        visit("bad-date", "FR", "01/02/2024", None),
        visit("backwards", "DE", "2024-03-10", Some("2024-03-01")),
    ];

    let result = engine()
        .calculate_comprehensive_status(&visits, d(2024, 6, 1))
        .unwrap();
    assert_eq!(result.status.used_days, 10);

    let codes = result.rejected.iter().map(|r| r.code).collect::<Vec<_>>();
    assert_eq!(codes, vec!["invalid_date", "invalid_interval"]);
}

#[test]
fn strict_mode_stops_on_the_first_bad_row() {
    let strict = ComplianceEngine::new(
        Arc::new(load_table()),
        EngineConfig {
            mode: ValidationMode::Strict,
            ..EngineConfig::default()
        },
    );
    let visits = vec![visit("bad-date", "FR", "2024-13-01", None)];
    let err = strict
        .calculate_schengen_status(&visits, d(2024, 6, 1))
        .unwrap_err();
    assert!(matches!(err, ComplianceError::InvalidDate { field: "entry_date", .. }));
}

#[test]
fn earliest_entry_and_max_stay_after_a_full_window() {
    let visits = vec![visit("v1", "NL", "2024-01-01", Some("2024-03-30"))];
    let engine = engine();

    let first = engine
        .earliest_entry(&visits, "BE", None, 10, d(2024, 4, 1))
        .unwrap()
        .expect("entry within a year");
    assert_eq!(first, d(2024, 6, 29));

    // Each later day of the trip pushes one January day out of the window.
    assert_eq!(engine.max_stay(&visits, "BE", None, first).unwrap(), 90);
    assert_eq!(engine.max_stay(&visits, "BE", None, d(2024, 4, 1)).unwrap(), 0);
}

fn flat_ten_per_visit(ctx: &EvaluationContext<'_>) -> Result<ComplianceStatus, ComplianceError> {
    let used = ctx
        .used_days
        .unwrap_or(ctx.visits.len() as i64 * 10);
    Ok(ComplianceStatus::from_usage(
        ctx.policy,
        used,
        ctx.as_of,
        ctx.as_of,
        ctx.as_of,
    ))
}

#[test]
fn custom_rule_runs_through_registered_evaluator() {
    let custom = StayPolicy {
        id: "xk-points".to_string(),
        country_code: "XK".to_string(),
        visa_type: "*".to_string(),
        calculation_method: CalculationMethod::Custom,
        max_days_per_stay: 25,
        max_days_per_period: None,
        period_days: None,
        valid_from: None,
        valid_until: None,
        requires_visa: false,
        visa_fee_cents: None,
        processing_days: None,
    };
    let table = PolicyTable::new(vec![custom], Some(StayPolicy::default_rolling())).unwrap();
    let visits = vec![
        visit("a", "XK", "2024-01-01", Some("2024-01-02")),
        visit("b", "XK", "2024-02-01", Some("2024-02-02")),
        visit("c", "XK", "2024-03-01", Some("2024-03-02")),
    ];

    let bare = ComplianceEngine::new(Arc::new(table.clone()), EngineConfig::default());
    assert!(matches!(
        bare.calculate_comprehensive_status(&visits, d(2024, 4, 1)),
        Err(ComplianceError::CustomEvaluatorMissing { .. })
    ));

    let wired = ComplianceEngine::new(Arc::new(table), EngineConfig::default()).with_policy_engine(
        PolicyEngine::new().with_custom_evaluator("xk-points", flat_ten_per_visit),
    );
    let result = wired
        .calculate_comprehensive_status(&visits, d(2024, 4, 1))
        .unwrap();
    let kosovo = &result.countries[0];
    assert_eq!(kosovo.status.used_days, 30);
    assert!(!kosovo.status.is_compliant);
}

#[test]
fn run_metrics_track_engine_calls() {
    let metrics = staywise_observability::RunMetrics::shared();
    let engine = engine();

    for as_of in [d(2024, 4, 15), d(2024, 9, 1)] {
        let visits = vec![visit("v1", "IT", "2024-01-01", Some("2024-03-31"))];
        let status = engine.calculate_schengen_status(&visits, as_of).unwrap();
        metrics.inc_evaluation();
        if !status.is_compliant {
            metrics.inc_violation();
        }
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.evaluations_total, 2);
    assert_eq!(snapshot.violations_total, 1);
}
