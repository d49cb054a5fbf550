use uuid::Uuid;

pub mod analysis;
pub mod context;
pub mod expense;
pub mod rule;

pub use analysis::*;
pub use context::*;
pub use expense::*;
pub use rule::*;

/// Identifier of records owned by the surrounding expense system
/// (expenses, users, groups) and of fraud rules.
pub type EntityId = String;

pub type AnalysisId = Uuid;

/// Clamps a score into [0, 1]. NaN collapses to 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
