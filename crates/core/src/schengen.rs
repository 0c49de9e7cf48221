use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::VisitRecord;

/// Policy table key for rules that apply across the whole area.
pub const ZONE_CODE: &str = "SCHENGEN";

const MEMBERS: [&str; 29] = [
    "AT", "BE", "BG", "CH", "CZ", "DE", "DK", "EE", "ES", "FI", "FR", "GR", "HR", "HU", "IS",
    "IT", "LI", "LT", "LU", "LV", "MT", "NL", "NO", "PL", "PT", "RO", "SE", "SI", "SK",
];

/// Countries whose days count against one shared allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchengenZone {
    members: BTreeSet<String>,
}

impl Default for SchengenZone {
    fn default() -> Self {
        Self::from_codes(MEMBERS)
    }
}

impl SchengenZone {
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            members: codes
                .into_iter()
                .map(|code| code.as_ref().trim().to_ascii_uppercase())
                .filter(|code| !code.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, country_code: &str) -> bool {
        country_code.eq_ignore_ascii_case(ZONE_CODE)
            || self.members.contains(&country_code.trim().to_ascii_uppercase())
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Member-country visits relabelled to the zone, so a day spent in two
    /// member states (a transit, say) is counted once.
    pub fn zone_visits(&self, visits: &[VisitRecord]) -> Vec<VisitRecord> {
        visits
            .iter()
            .filter(|visit| self.contains(&visit.country_code))
            .map(|visit| VisitRecord {
                country_code: ZONE_CODE.to_string(),
                ..visit.clone()
            })
            .collect()
    }
}
