use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::error::ComplianceError;
use crate::models::{DateInterval, RawVisit, ValidationMode, VisitRecord, DEFAULT_VISA_TYPE};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Serialize)]
pub struct RejectedVisit {
    pub id: String,
    pub code: &'static str,
    pub reason: String,
}

impl RejectedVisit {
    fn from_error(id: &str, err: &ComplianceError) -> Self {
        Self {
            id: id.to_string(),
            code: err.code(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedVisits {
    /// Sorted by interval start, ties broken by end then id.
    pub records: Vec<VisitRecord>,
    pub rejected: Vec<RejectedVisit>,
}

/// Validates raw visits into canonical records.
///
/// Open stays stay open here; they are resolved against an as-of date only at
/// evaluation time. Overlapping records are kept as-is.
pub fn normalize(
    raw_visits: &[RawVisit],
    mode: ValidationMode,
) -> Result<NormalizedVisits, ComplianceError> {
    let mut out = NormalizedVisits::default();

    for raw in raw_visits {
        match normalize_visit(raw) {
            Ok(record) => out.records.push(record),
            Err(err) => match mode {
                ValidationMode::Strict => return Err(err),
                ValidationMode::Tolerant => {
                    warn!(visit_id = %raw.id, code = err.code(), "visit rejected");
                    out.rejected.push(RejectedVisit::from_error(&raw.id, &err));
                }
            },
        }
    }

    sort_records(&mut out.records);
    Ok(out)
}

pub fn normalize_visit(raw: &RawVisit) -> Result<VisitRecord, ComplianceError> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Err(ComplianceError::MissingField {
            id: "<unknown>".to_string(),
            field: "id",
        });
    }

    let country_code = normalize_country(&raw.country);
    if country_code.is_empty() {
        return Err(ComplianceError::MissingField {
            id: id.to_string(),
            field: "country",
        });
    }

    let entry = parse_date(id, "entry_date", &raw.entry_date)?;
    let exit = match raw.exit_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(parse_date(id, "exit_date", value)?),
    };

    let interval = DateInterval::new(entry, exit).map_err(|_| ComplianceError::InvalidInterval {
        id: id.to_string(),
        entry,
        exit: exit.unwrap_or(entry),
    })?;

    Ok(VisitRecord {
        id: id.to_string(),
        country_code,
        interval,
        visa_type: normalize_visa_type(raw.visa_type.as_deref()),
        source_policy_id: None,
        max_days: raw.max_days,
    })
}

pub fn normalize_country(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

pub fn normalize_visa_type(value: Option<&str>) -> String {
    match value.map(|v| v.trim().to_lowercase()) {
        Some(v) if !v.is_empty() => v.replace([' ', '-'], "_"),
        _ => DEFAULT_VISA_TYPE.to_string(),
    }
}

pub fn sort_records(records: &mut [VisitRecord]) {
    records.sort_by(|a, b| {
        a.interval
            .start
            .cmp(&b.interval.start)
            .then_with(|| a.interval.end.cmp(&b.interval.end))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn parse_date(id: &str, field: &'static str, value: &str) -> Result<NaiveDate, ComplianceError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| ComplianceError::InvalidDate {
        id: id.to_string(),
        field,
        value: value.to_string(),
    })
}
