use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ComplianceError;
use crate::models::{ComplianceStatus, PassportCandidate, StayPolicy, DEFAULT_VISA_TYPE};
use crate::policy::{PolicyEngine, PolicyTable};
use crate::status::{severity_for, Severity};

/// Access tiers, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    VisaFreeCompliant,
    VisaFreeNearLimit,
    VisaRequired,
    /// Visa-free, but the allowance is already spent.
    Exhausted,
}

impl AccessTier {
    pub fn label(self) -> &'static str {
        match self {
            Self::VisaFreeCompliant => "visa-free",
            Self::VisaFreeNearLimit => "visa-free near limit",
            Self::VisaRequired => "visa-required",
            Self::Exhausted => "visa-free allowance exhausted",
        }
    }
}

/// Which comparison separated the recommended passport from the runner-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingFactor {
    AccessTier,
    RemainingDays,
    VisaFee,
    ProcessingTime,
    /// Nothing separated them; input order decides.
    Tie,
    /// Only one passport was compared.
    Uncontested,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassportEvaluation {
    pub passport_id: String,
    pub issuing_country: String,
    pub policy_id: String,
    pub tier: AccessTier,
    pub status: ComplianceStatus,
    pub visa_fee_cents: Option<u64>,
    pub processing_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassportComparison {
    pub destination: String,
    pub ranked: Vec<PassportEvaluation>,
    pub recommended: Option<String>,
    pub deciding_factor: RankingFactor,
    pub explanation: String,
}

/// Ranks passports for `destination`, best first.
///
/// Order: access tier, then more remaining days, then lower known visa fee,
/// then shorter known processing time. Unknown fees and processing times sort
/// after known ones.
pub fn compare(
    engine: &PolicyEngine,
    table: &PolicyTable,
    passports: &[PassportCandidate],
    destination: &str,
    used_days: &HashMap<String, i64>,
    as_of: NaiveDate,
) -> Result<PassportComparison, ComplianceError> {
    let destination = destination.trim().to_ascii_uppercase();

    let mut ranked = Vec::with_capacity(passports.len());
    for passport in passports {
        let policy = resolve_for(passport, table, &destination)?;
        let used = used_days.get(&passport.passport_id).copied().unwrap_or(0);
        let status = engine.evaluate_usage(policy, used, as_of)?;

        ranked.push(PassportEvaluation {
            passport_id: passport.passport_id.clone(),
            issuing_country: passport.country_code.clone(),
            policy_id: policy.id.clone(),
            tier: tier_for(policy, &status),
            status,
            visa_fee_cents: policy.visa_fee_cents,
            processing_days: policy.processing_days,
        });
    }

    // Stable sort keeps input order among full ties.
    ranked.sort_by(|a, b| {
        deciding(a, b)
            .map(|(_, ordering)| ordering)
            .unwrap_or(Ordering::Equal)
    });

    let (deciding_factor, explanation) = match ranked.as_slice() {
        [] => (RankingFactor::Uncontested, "no passports to compare".to_string()),
        [only] => (
            RankingFactor::Uncontested,
            format!("only passport compared ({})", only.tier.label()),
        ),
        [best, runner_up, ..] => match deciding(best, runner_up) {
            Some((factor, _)) => (factor, explain(factor, best, runner_up)),
            None => (
                RankingFactor::Tie,
                "tie on every factor; input order kept".to_string(),
            ),
        },
    };

    debug!(
        destination = %destination,
        candidates = ranked.len(),
        factor = ?deciding_factor,
        "passports compared"
    );

    Ok(PassportComparison {
        recommended: ranked.first().map(|e| e.passport_id.clone()),
        destination,
        ranked,
        deciding_factor,
        explanation,
    })
}

/// The passport's own policy for the destination, preferring visa-free
/// entries, else the table's entry for the destination.
///
/// The table is keyed by destination only, so rules that depend on the
/// issuing country must arrive through `applicable_policies`. Passports
/// without their own entry all share the table's destination policy.
fn resolve_for<'a>(
    passport: &'a PassportCandidate,
    table: &'a PolicyTable,
    destination: &str,
) -> Result<&'a StayPolicy, ComplianceError> {
    let mut own = passport
        .applicable_policies
        .iter()
        .filter(|p| p.country_code.trim().eq_ignore_ascii_case(destination))
        .collect::<Vec<_>>();
    own.sort_by_key(|p| p.requires_visa);

    match own.first() {
        Some(policy) => Ok(policy),
        None => table.resolve(destination, DEFAULT_VISA_TYPE),
    }
}

fn tier_for(policy: &StayPolicy, status: &ComplianceStatus) -> AccessTier {
    if policy.requires_visa {
        return AccessTier::VisaRequired;
    }
    if !status.is_compliant {
        return AccessTier::Exhausted;
    }
    match severity_for(status) {
        Severity::None | Severity::Caution => AccessTier::VisaFreeCompliant,
        Severity::Warning | Severity::Critical => AccessTier::VisaFreeNearLimit,
    }
}

/// First factor on which `a` and `b` differ, with the order it implies.
fn deciding(a: &PassportEvaluation, b: &PassportEvaluation) -> Option<(RankingFactor, Ordering)> {
    let checks = [
        (RankingFactor::AccessTier, a.tier.cmp(&b.tier)),
        (
            RankingFactor::RemainingDays,
            b.status.remaining_days.cmp(&a.status.remaining_days),
        ),
        (
            RankingFactor::VisaFee,
            known_first(a.visa_fee_cents, b.visa_fee_cents),
        ),
        (
            RankingFactor::ProcessingTime,
            known_first(a.processing_days, b.processing_days),
        ),
    ];
    checks
        .into_iter()
        .find(|(_, ordering)| *ordering != Ordering::Equal)
}

fn known_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn explain(factor: RankingFactor, best: &PassportEvaluation, runner_up: &PassportEvaluation) -> String {
    match factor {
        RankingFactor::AccessTier => {
            format!("{} vs {}", best.tier.label(), runner_up.tier.label())
        }
        RankingFactor::RemainingDays => format!(
            "more remaining days ({} vs {})",
            best.status.remaining_days, runner_up.status.remaining_days
        ),
        RankingFactor::VisaFee => "lower visa fee".to_string(),
        RankingFactor::ProcessingTime => "shorter visa processing time".to_string(),
        RankingFactor::Tie => "tie on every factor; input order kept".to_string(),
        RankingFactor::Uncontested => "only passport compared".to_string(),
    }
}
