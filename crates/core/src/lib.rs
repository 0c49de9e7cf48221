pub mod engine;
pub mod error;
pub mod models;
pub mod normalize;
pub mod passport;
pub mod policy;
pub mod schengen;
pub mod status;
pub mod trip;
pub mod window;

pub use engine::{ComplianceEngine, ComprehensiveStatus, EngineConfig, OverstayReport, ScopeStatus};
pub use error::ComplianceError;
pub use models::*;
pub use normalize::{normalize, NormalizedVisits, RejectedVisit};
pub use passport::{compare, AccessTier, PassportComparison, PassportEvaluation, RankingFactor};
pub use policy::{CustomEvaluator, EvaluationContext, PolicyEngine, PolicyTable};
pub use schengen::{SchengenZone, ZONE_CODE};
pub use status::{
    build_report, recommendation_for, severity_for, ComplianceWarning, Severity, StatusReport,
    WarningCode,
};
pub use trip::{earliest_entry_date, max_stay_from, validate_future_trip, TripAssessment};
pub use window::{days_in_range, days_in_window, merge_spans, DaySpan};
