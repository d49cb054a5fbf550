use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{EntityId, ExpenseRecord};

/// Attributes of the expense under analysis, flattened for rule lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub has_receipt: bool,
    pub participant_count: usize,
    pub payer_participates: bool,
    pub participant_amount_mismatch: bool,
    /// Whole amount of at least 100
    pub is_round_amount: bool,
    /// Digits after the decimal point in the shortest form of the amount
    pub decimal_places: u32,
}

impl ExpenseAttributes {
    pub fn from_record(record: &ExpenseRecord, payer_id: &str) -> Self {
        let participant_total: f64 = record.participants.iter().map(|p| p.amount).sum();
        Self {
            id: record.id.clone(),
            amount: record.amount,
            currency: record.currency.clone(),
            category: record.category.clone(),
            description: record.description.clone(),
            merchant: record.merchant.clone(),
            timestamp: record.timestamp,
            has_receipt: record.has_receipt,
            participant_count: record.participants.len(),
            payer_participates: record.participants.iter().any(|p| p.user_id == payer_id),
            participant_amount_mismatch: !record.participants.is_empty()
                && (participant_total - record.amount).abs() > 0.01,
            is_round_amount: record.amount >= 100.0 && record.amount.fract() == 0.0,
            decimal_places: decimal_places(record.amount),
        }
    }
}

fn decimal_places(amount: f64) -> u32 {
    if !amount.is_finite() {
        return 0;
    }
    amount
        .to_string()
        .split_once('.')
        .map(|(_, fraction)| fraction.len() as u32)
        .unwrap_or(0)
}

/// Rolling-window statistics over prior expenses of a payer or group.
///
/// An absent history is an empty window with `count == 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub count: usize,
    pub total: f64,
    pub average: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub std_dev: f64,
    pub count_last_hour: usize,
    pub count_last_24h: usize,
    /// Prior expenses with exactly the analysed amount
    pub same_amount_count: usize,
    pub same_amount_last_24h: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_expense_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_since_last: Option<f64>,
}

impl HistoryStats {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Only expenses at or before `at` and different from `exclude_id` count.
    pub fn from_window(
        window: &[ExpenseRecord],
        amount: f64,
        at: DateTime<Utc>,
        exclude_id: Option<&str>,
    ) -> Self {
        let prior: Vec<&ExpenseRecord> = window
            .iter()
            .filter(|e| e.timestamp <= at)
            .filter(|e| match (exclude_id, e.id.as_deref()) {
                (Some(excluded), Some(id)) => excluded != id,
                _ => true,
            })
            .collect();

        if prior.is_empty() {
            return Self::empty();
        }

        let count = prior.len();
        let total: f64 = prior.iter().map(|e| e.amount).sum();
        let average = total / count as f64;
        let variance = prior
            .iter()
            .map(|e| (e.amount - average).powi(2))
            .sum::<f64>()
            / count as f64;
        let max = prior.iter().map(|e| e.amount).fold(f64::MIN, f64::max);
        let within = |d: Duration| prior.iter().filter(|e| at - e.timestamp < d).count();
        let last_expense_at = prior.iter().map(|e| e.timestamp).max();
        let same_amount: Vec<&&ExpenseRecord> = prior
            .iter()
            .filter(|e| (e.amount - amount).abs() < 0.005)
            .collect();

        Self {
            count,
            total,
            average,
            max: Some(max),
            std_dev: variance.sqrt(),
            count_last_hour: within(Duration::hours(1)),
            count_last_24h: within(Duration::hours(24)),
            same_amount_count: same_amount.len(),
            same_amount_last_24h: same_amount
                .iter()
                .filter(|e| at - e.timestamp < Duration::hours(24))
                .count(),
            last_expense_at,
            minutes_since_last: last_expense_at
                .map(|last| (at - last).num_seconds() as f64 / 60.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayerContext {
    pub id: EntityId,
    pub history: HistoryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub history: HistoryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingContext {
    pub hour: u32,
    /// 0 = Sunday
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub is_late_night: bool,
}

impl TimingContext {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        let hour = timestamp.hour();
        let day_of_week = timestamp.weekday().num_days_from_sunday();
        Self {
            hour,
            day_of_week,
            is_weekend: day_of_week == 0 || day_of_week == 6,
            is_late_night: hour >= 23 || hour <= 5,
        }
    }
}

/// Ratios against history. A ratio is absent when its denominator is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedSignals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_to_payer_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_to_group_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_amount_z_score: Option<f64>,
}

impl DerivedSignals {
    pub fn compute(amount: f64, payer: &HistoryStats, group: &HistoryStats) -> Self {
        let ratio = |stats: &HistoryStats| {
            (stats.count > 0 && stats.average > 0.0).then(|| amount / stats.average)
        };
        Self {
            amount_to_payer_average: ratio(payer),
            amount_to_group_average: ratio(group),
            payer_amount_z_score: (payer.count > 1 && payer.std_dev > 0.0)
                .then(|| (amount - payer.average) / payer.std_dev),
        }
    }
}

/// Input bundle shared by the rule engine and the ML client.
///
/// Immutable once built; the JSON document used for dotted field lookup is
/// rendered at construction time.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub expense: ExpenseAttributes,
    pub payer: PayerContext,
    pub group: GroupContext,
    pub timing: TimingContext,
    pub derived: DerivedSignals,
    #[serde(skip)]
    document: Value,
}

impl AnalysisContext {
    pub fn new(
        expense: ExpenseAttributes,
        payer: PayerContext,
        group: GroupContext,
        timing: TimingContext,
        derived: DerivedSignals,
    ) -> Self {
        let mut context = Self {
            expense,
            payer,
            group,
            timing,
            derived,
            document: Value::Null,
        };
        context.document = serde_json::to_value(&context).unwrap_or(Value::Null);
        context
    }

    pub fn expense_id(&self) -> Option<&str> {
        self.expense.id.as_deref()
    }

    pub fn payer_id(&self) -> &str {
        &self.payer.id
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group.id.as_deref()
    }

    /// Key shared by analyses of the same group, or of the same payer when
    /// the expense has no group.
    pub fn scope_key(&self) -> String {
        match &self.group.id {
            Some(group_id) => format!("group:{}", group_id),
            None => format!("payer:{}", self.payer.id),
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Resolves a dotted path such as `payer.history.average`.
    /// Numeric segments index into arrays. Returns `None` when any segment is
    /// missing or the value is null.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        if path.trim().is_empty() {
            return None;
        }
        let mut current = &self.document;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }
}
