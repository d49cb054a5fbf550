//! Deployable fraud analysis service for the shared-expense application.

pub mod default_rules;
