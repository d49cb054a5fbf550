use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display as EnumDisplay, EnumString};

use super::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleCategory {
    Amount,
    Frequency,
    Timing,
    Behavior,
    Pattern,
    Duplicate,
    Threshold,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Comparison applied by a single condition.
///
/// Unknown operator names found in stored rules deserialize to
/// `Unsupported`, which makes the owning rule evaluate as not triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Regex,
    Exists,
    NotExists,
    Between,
    NotBetween,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the analysis context, e.g. `expense.amount`
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub value_type: ValueType,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        let value_type = match &value {
            Value::Number(_) => ValueType::Number,
            Value::Bool(_) => ValueType::Boolean,
            Value::Array(_) => ValueType::Array,
            _ => ValueType::String,
        };
        Self {
            field: field.into(),
            operator,
            value,
            value_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleAction {
    CreateAlert,
    Block,
    RequireApproval,
    Notify,
    Log,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_triggers: u32,
    /// Rolling window; the engine-wide default applies when absent
    #[serde(default)]
    pub window_secs: Option<u64>,
}

/// Days and time of day during which a rule is eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchedule {
    /// 0 = Sunday; empty means every day
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    /// `HH:MM`, inclusive
    #[serde(default)]
    pub start_time: Option<String>,
    /// `HH:MM`, exclusive; may be earlier than `start_time` to wrap midnight
    #[serde(default)]
    pub end_time: Option<String>,
    /// `UTC` or a fixed offset such as `+02:00`
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStatistics {
    pub trigger_count: u64,
    pub true_positives: u64,
    pub false_positives: u64,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl RuleStatistics {
    /// TP / (TP + FP); undefined until feedback exists.
    pub fn effectiveness(&self) -> Option<f64> {
        let feedback = self.true_positives + self.false_positives;
        (feedback > 0).then(|| self.true_positives as f64 / feedback as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRule {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: RuleCategory,
    #[serde(default = "default_active")]
    pub active: bool,
    pub severity: Severity,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    pub score_impact: f64,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub schedule: Option<RuleSchedule>,
    #[serde(default)]
    pub statistics: RuleStatistics,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl FraudRule {
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        category: RuleCategory,
        severity: Severity,
        score_impact: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            category,
            active: true,
            severity,
            priority: 0,
            conditions: Vec::new(),
            logical_operator: LogicalOperator::And,
            score_impact,
            actions: Vec::new(),
            rate_limit: None,
            schedule: None,
            statistics: RuleStatistics::default(),
            version: 1,
            updated_by: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logical_operator(mut self, logical_operator: LogicalOperator) -> Self {
        self.logical_operator = logical_operator;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_actions(mut self, actions: Vec<RuleAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_schedule(mut self, schedule: RuleSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn effectiveness(&self) -> Option<f64> {
        self.statistics.effectiveness()
    }
}

/// Configuration of a rule as it was before an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVersion {
    pub rule_id: EntityId,
    pub version: u32,
    pub snapshot: FraudRule,
    pub replaced_at: DateTime<Utc>,
    #[serde(default)]
    pub replaced_by: Option<String>,
}
