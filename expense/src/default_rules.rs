//! Rule catalogue installed on a fresh database.
//!
//! These are the fixed expense checks of the application expressed as
//! ordinary declarative rules, so they can be tuned, disabled or versioned
//! like any rule an administrator adds later.

use serde_json::json;

use common::config::RulesConfig;
use scoring::model::{
    Condition, FraudRule, LogicalOperator, Operator, RuleAction, RuleCategory, Severity,
};

pub const SUSPICIOUS_CATEGORIES: [&str; 2] = ["gambling", "adult"];
pub const MAX_PARTICIPANTS: u32 = 20;
/// More digits than a currency amount carries
pub const MAX_DECIMAL_PLACES: u32 = 2;

pub fn default_rules(config: &RulesConfig) -> Vec<FraudRule> {
    let blacklist: Vec<String> = config
        .blacklisted_merchants
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect();

    vec![
        FraudRule::new(
            "blacklisted-merchant",
            "Blacklisted merchant",
            RuleCategory::Pattern,
            Severity::High,
            0.45,
        )
        .with_description("Merchant is on the configured blacklist")
        .with_priority(95)
        .with_condition(Condition::new("expense.merchant", Operator::In, json!(blacklist)))
        .with_actions(vec![RuleAction::CreateAlert, RuleAction::Block]),
        FraudRule::new(
            "unusual-amount-payer",
            "Unusual amount for payer",
            RuleCategory::Amount,
            Severity::High,
            0.4,
        )
        .with_description("Amount is more than three times the payer's recent average")
        .with_priority(90)
        .with_condition(Condition::new(
            "derived.amount_to_payer_average",
            Operator::GreaterThan,
            json!(3.0),
        ))
        .with_actions(vec![RuleAction::CreateAlert, RuleAction::RequireApproval]),
        FraudRule::new(
            "excessive-amount-group",
            "Excessive amount for group",
            RuleCategory::Amount,
            Severity::High,
            0.35,
        )
        .with_description("Amount is more than five times the group's recent average")
        .with_priority(85)
        .with_condition(Condition::new(
            "derived.amount_to_group_average",
            Operator::GreaterThan,
            json!(5.0),
        ))
        .with_actions(vec![RuleAction::CreateAlert]),
        FraudRule::new(
            "rapid-expenses",
            "Rapid repeated expenses",
            RuleCategory::Frequency,
            Severity::High,
            0.3,
        )
        .with_description("Payer recorded three or more expenses in the last hour")
        .with_priority(80)
        .with_condition(Condition::new(
            "payer.history.count_last_hour",
            Operator::GreaterThanOrEqual,
            json!(3),
        ))
        .with_actions(vec![RuleAction::Notify]),
        FraudRule::new(
            "participant-amount-mismatch",
            "Participant shares do not add up",
            RuleCategory::Behavior,
            Severity::High,
            0.3,
        )
        .with_description("Participant amounts differ from the expense total")
        .with_priority(70)
        .with_condition(Condition::new(
            "expense.participant_amount_mismatch",
            Operator::Equals,
            json!(true),
        ))
        .with_actions(vec![RuleAction::RequireApproval]),
        FraudRule::new(
            "suspicious-category",
            "Suspicious category",
            RuleCategory::Pattern,
            Severity::Medium,
            0.25,
        )
        .with_priority(60)
        .with_condition(Condition::new(
            "expense.category",
            Operator::In,
            json!(SUSPICIOUS_CATEGORIES),
        ))
        .with_actions(vec![RuleAction::Log]),
        FraudRule::new(
            "duplicate-amount-24h",
            "Duplicate amount within a day",
            RuleCategory::Duplicate,
            Severity::Medium,
            0.25,
        )
        .with_description("Payer already recorded the same amount in the last 24 hours")
        .with_priority(50)
        .with_condition(Condition::new(
            "payer.history.same_amount_last_24h",
            Operator::GreaterThanOrEqual,
            json!(1),
        )),
        FraudRule::new(
            "payer-not-participating",
            "Payer not participating",
            RuleCategory::Behavior,
            Severity::Medium,
            0.15,
        )
        .with_description("Payer split the expense without taking a share")
        .with_priority(40)
        .with_logical_operator(LogicalOperator::And)
        .with_condition(Condition::new(
            "expense.participant_count",
            Operator::GreaterThan,
            json!(0),
        ))
        .with_condition(Condition::new(
            "expense.payer_participates",
            Operator::Equals,
            json!(false),
        )),
        FraudRule::new(
            "excessive-participants",
            "Excessive participants",
            RuleCategory::Behavior,
            Severity::Medium,
            0.15,
        )
        .with_priority(30)
        .with_condition(Condition::new(
            "expense.participant_count",
            Operator::GreaterThan,
            json!(MAX_PARTICIPANTS),
        )),
        FraudRule::new(
            "late-night",
            "Late night expense",
            RuleCategory::Timing,
            Severity::Low,
            0.1,
        )
        .with_description("Recorded between 02:00 and 05:59 UTC")
        .with_priority(20)
        .with_condition(Condition::new("timing.hour", Operator::Between, json!([2, 5]))),
        FraudRule::new(
            "round-amount",
            "Round amount",
            RuleCategory::Pattern,
            Severity::Low,
            0.05,
        )
        .with_description("Whole amount of 100 or more")
        .with_priority(10)
        .with_condition(Condition::new(
            "expense.is_round_amount",
            Operator::Equals,
            json!(true),
        )),
        FraudRule::new(
            "precise-amount",
            "Unusually precise amount",
            RuleCategory::Pattern,
            Severity::Low,
            0.05,
        )
        .with_description("Amount carries more than two decimal places")
        .with_priority(5)
        .with_condition(Condition::new(
            "expense.decimal_places",
            Operator::GreaterThan,
            json!(MAX_DECIMAL_PLACES),
        )),
    ]
}
