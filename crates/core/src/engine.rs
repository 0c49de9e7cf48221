use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::ComplianceError;
use crate::models::{
    ComplianceStatus, PassportCandidate, PlannedTrip, RawVisit, StayPolicy, ValidationMode,
    VisitRecord, DEFAULT_VISA_TYPE,
};
use crate::normalize::{
    normalize, normalize_country, normalize_visa_type, NormalizedVisits, RejectedVisit,
};
use crate::passport::{compare, PassportComparison};
use crate::policy::{PolicyEngine, PolicyTable};
use crate::schengen::{SchengenZone, ZONE_CODE};
use crate::status::{build_report, ComplianceWarning, Severity, StatusReport, WarningCode};
use crate::trip::{self, TripAssessment};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: ValidationMode,
    pub schengen_zone: SchengenZone,
    /// Visa type used to resolve the zone-wide Schengen policy.
    pub schengen_visa_type: String,
    /// How far ahead `earliest_entry` searches, in days.
    pub search_horizon_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Tolerant,
            schengen_zone: SchengenZone::default(),
            schengen_visa_type: DEFAULT_VISA_TYPE.to_string(),
            search_horizon_days: 365,
        }
    }
}

/// Status of one country, or of the Schengen zone as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStatus {
    pub scope: String,
    pub visa_type: String,
    pub status: ComplianceStatus,
    pub report: StatusReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveStatus {
    pub as_of: NaiveDate,
    pub status: ComplianceStatus,
    pub severity: Severity,
    pub countries: Vec<ScopeStatus>,
    pub warnings: Vec<ComplianceWarning>,
    pub recommendations: Vec<String>,
    pub rejected: Vec<RejectedVisit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverstayReport {
    pub as_of: NaiveDate,
    pub warnings: Vec<ComplianceWarning>,
    pub schengen_warnings: Vec<ComplianceWarning>,
    pub rejected: Vec<RejectedVisit>,
}

/// Entry point for callers. Holds only read-only configuration, so one
/// instance can be shared across threads.
#[derive(Debug, Clone)]
pub struct ComplianceEngine {
    table: Arc<PolicyTable>,
    policy_engine: PolicyEngine,
    config: EngineConfig,
}

impl ComplianceEngine {
    pub fn new(table: Arc<PolicyTable>, config: EngineConfig) -> Self {
        Self {
            table,
            policy_engine: PolicyEngine::new(),
            config,
        }
    }

    pub fn with_policy_engine(mut self, policy_engine: PolicyEngine) -> Self {
        self.policy_engine = policy_engine;
        self
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn normalize(&self, visits: &[RawVisit]) -> Result<NormalizedVisits, ComplianceError> {
        normalize(visits, self.config.mode)
    }

    #[instrument(skip(self, visits), fields(visits = visits.len()))]
    pub fn calculate_schengen_status(
        &self,
        visits: &[RawVisit],
        as_of: NaiveDate,
    ) -> Result<ComplianceStatus, ComplianceError> {
        let normalized = self.normalize(visits)?;
        self.schengen_status(&normalized.records, as_of)
    }

    #[instrument(skip(self, visits), fields(visits = visits.len()))]
    pub fn calculate_comprehensive_status(
        &self,
        visits: &[RawVisit],
        as_of: NaiveDate,
    ) -> Result<ComprehensiveStatus, ComplianceError> {
        let normalized = self.normalize(visits)?;
        let schengen = self.schengen_status(&normalized.records, as_of)?;
        let schengen_report = build_report(&schengen, Some(ZONE_CODE));

        let countries = self.country_statuses(&normalized.records, as_of)?;

        let mut warnings = schengen_report.warnings.clone();
        let mut recommendations = schengen_report.recommendations.clone();
        let mut severity = schengen_report.severity;
        for country in &countries {
            warnings.extend(country.report.warnings.iter().cloned());
            for text in &country.report.recommendations {
                if !recommendations.contains(text) {
                    recommendations.push(text.clone());
                }
            }
            severity = severity.max(country.report.severity);
        }

        info!(
            used_days = schengen.used_days,
            severity = severity.as_code(),
            countries = countries.len(),
            rejected = normalized.rejected.len(),
            "comprehensive status calculated"
        );

        Ok(ComprehensiveStatus {
            as_of,
            status: schengen,
            severity,
            countries,
            warnings,
            recommendations,
            rejected: normalized.rejected,
        })
    }

    #[instrument(skip(self, visits, planned), fields(country = %planned.country_code))]
    pub fn validate_future_trip(
        &self,
        visits: &[RawVisit],
        planned: &PlannedTrip,
        now: NaiveDate,
    ) -> Result<TripAssessment, ComplianceError> {
        let normalized = self.normalize(visits)?;
        let visa_type = normalize_visa_type(Some(&planned.visa_type));
        let (scope, existing) = self.scope(&normalized.records, &planned.country_code);
        let policy = self.resolve_scope_policy(&scope, &visa_type)?;

        let scoped_trip = PlannedTrip {
            country_code: scope,
            visa_type,
            ..planned.clone()
        };
        let assessment =
            trip::validate_future_trip(&self.policy_engine, &existing, &scoped_trip, policy, now)?;

        if !assessment.can_travel {
            warn!(
                projected = assessment.projected_used_days,
                excess = assessment.excess_days,
                "planned trip would breach stay limit"
            );
        }
        Ok(assessment)
    }

    #[instrument(skip(self, visits), fields(visits = visits.len()))]
    pub fn check_overstay_warnings(
        &self,
        visits: &[RawVisit],
        as_of: NaiveDate,
    ) -> Result<OverstayReport, ComplianceError> {
        let normalized = self.normalize(visits)?;

        let mut warnings = allowance_warnings(&normalized.records, as_of);
        for country in self.country_statuses(&normalized.records, as_of)? {
            warnings.extend(country.report.warnings);
        }

        let schengen = self.schengen_status(&normalized.records, as_of)?;
        let schengen_warnings = build_report(&schengen, Some(ZONE_CODE)).warnings;

        Ok(OverstayReport {
            as_of,
            warnings,
            schengen_warnings,
            rejected: normalized.rejected,
        })
    }

    #[instrument(skip(self, passports, used_days), fields(passports = passports.len()))]
    pub fn compare_passports(
        &self,
        passports: &[PassportCandidate],
        destination: &str,
        used_days: &HashMap<String, i64>,
        as_of: NaiveDate,
    ) -> Result<PassportComparison, ComplianceError> {
        compare(
            &self.policy_engine,
            &self.table,
            passports,
            destination,
            used_days,
            as_of,
        )
    }

    /// First date on or after `from` that admits a `duration_days` trip.
    pub fn earliest_entry(
        &self,
        visits: &[RawVisit],
        country_code: &str,
        visa_type: Option<&str>,
        duration_days: i64,
        from: NaiveDate,
    ) -> Result<Option<NaiveDate>, ComplianceError> {
        let normalized = self.normalize(visits)?;
        let (scope, existing) = self.scope(&normalized.records, country_code);
        let policy = self.resolve_scope_policy(&scope, &normalize_visa_type(visa_type))?;
        trip::earliest_entry_date(
            &self.policy_engine,
            &existing,
            &scope,
            duration_days,
            policy,
            from,
            self.config.search_horizon_days,
        )
    }

    /// Longest compliant stay entering on `entry`.
    pub fn max_stay(
        &self,
        visits: &[RawVisit],
        country_code: &str,
        visa_type: Option<&str>,
        entry: NaiveDate,
    ) -> Result<i64, ComplianceError> {
        let normalized = self.normalize(visits)?;
        let (scope, existing) = self.scope(&normalized.records, country_code);
        let policy = self.resolve_scope_policy(&scope, &normalize_visa_type(visa_type))?;
        trip::max_stay_from(&self.policy_engine, &existing, &scope, entry, policy)
    }

    fn schengen_status(
        &self,
        records: &[VisitRecord],
        as_of: NaiveDate,
    ) -> Result<ComplianceStatus, ComplianceError> {
        let zone_visits = self.config.schengen_zone.zone_visits(records);
        let policy = self.resolve_scope_policy(ZONE_CODE, &self.config.schengen_visa_type)?;
        self.policy_engine.evaluate(&zone_visits, policy, as_of)
    }

    /// One status per visited non-Schengen country, keyed on the visa type
    /// of the most recent visit there.
    fn country_statuses(
        &self,
        records: &[VisitRecord],
        as_of: NaiveDate,
    ) -> Result<Vec<ScopeStatus>, ComplianceError> {
        let mut by_country: BTreeMap<&str, Vec<VisitRecord>> = BTreeMap::new();
        for record in records {
            if record.interval.start > as_of
                || self.config.schengen_zone.contains(&record.country_code)
            {
                continue;
            }
            by_country
                .entry(record.country_code.as_str())
                .or_default()
                .push(record.clone());
        }

        let mut statuses = Vec::with_capacity(by_country.len());
        for (country, visits) in by_country {
            // Records are sorted by start, so the last one is the latest entry.
            let visa_type = visits
                .last()
                .map(|v| v.visa_type.clone())
                .unwrap_or_else(|| DEFAULT_VISA_TYPE.to_string());
            let policy = self.table.resolve(country, &visa_type)?;
            let status = self.policy_engine.evaluate(&visits, policy, as_of)?;
            let report = build_report(&status, Some(country));
            statuses.push(ScopeStatus {
                scope: country.to_string(),
                visa_type,
                status,
                report,
            });
        }
        Ok(statuses)
    }

    /// Policy key and visits for a destination. Schengen members share the zone.
    fn scope(&self, records: &[VisitRecord], country_code: &str) -> (String, Vec<VisitRecord>) {
        let country = normalize_country(country_code);
        if self.config.schengen_zone.contains(&country) {
            (
                ZONE_CODE.to_string(),
                self.config.schengen_zone.zone_visits(records),
            )
        } else {
            let visits = records
                .iter()
                .filter(|r| r.country_code == country)
                .cloned()
                .collect();
            (country, visits)
        }
    }

    fn resolve_scope_policy(
        &self,
        scope: &str,
        visa_type: &str,
    ) -> Result<&StayPolicy, ComplianceError> {
        self.table.resolve(scope, visa_type)
    }
}

/// Visits longer than their own `max_days` allowance.
fn allowance_warnings(records: &[VisitRecord], as_of: NaiveDate) -> Vec<ComplianceWarning> {
    records
        .iter()
        .filter(|record| record.interval.start <= as_of)
        .filter_map(|record| {
            let allowed = i64::from(record.max_days?);
            let length = record.interval.length_days(as_of);
            (length > allowed).then(|| {
                let excess = length - allowed;
                ComplianceWarning {
                    code: WarningCode::VisitExceedsAllowance,
                    severity: Severity::Critical,
                    country_code: Some(record.country_code.clone()),
                    message: format!(
                        "visit {} in {} lasts {length} days against an allowance of {allowed}, exceeded by {excess} days",
                        record.id, record.country_code
                    ),
                    excess_days: Some(excess),
                }
            })
        })
        .collect()
}
