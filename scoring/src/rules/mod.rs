//! Declarative rule evaluation: conditions, schedule and rate-limit guards,
//! definition validation and the engine that ties them together.

pub mod condition;
pub mod engine;
pub mod guards;
pub mod schema;

pub use engine::{RuleEngine, RuleEvaluation, RuleOutcome, SkipReason};
pub use guards::RuleRateLimiter;
pub use schema::validate_rule;
