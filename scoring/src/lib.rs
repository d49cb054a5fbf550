//! Fraud risk scoring for shared expenses.
//!
//! An analysis combines a configurable rule engine with an optional external
//! ML model, degrades to a rule-only score when the model is unavailable and
//! feeds reviewer labels back into rule statistics.

pub mod alerts;
pub mod analyzer;
pub mod combiner;
pub mod context_builder;
pub mod error;
pub mod executable_utils;
pub mod ml;
pub mod model;
pub mod rate_limit;
pub mod rules;
pub mod storage;
