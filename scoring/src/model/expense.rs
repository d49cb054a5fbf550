use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: EntityId,
    pub amount: f64,
}

/// Expense as stored by the surrounding expense system.
///
/// Everything but `amount` and `timestamp` is optional because bulk and
/// ad-hoc analyses submit partial payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub payer_id: Option<EntityId>,
    #[serde(default)]
    pub group_id: Option<EntityId>,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_receipt: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Reference to the expense under analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseRef {
    /// Look the expense up in the expense store
    Stored(EntityId),
    /// Analyse a payload that may not be persisted yet
    Inline(ExpenseRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub expense: ExpenseRef,
    /// Overrides the payer recorded on the expense
    #[serde(default)]
    pub payer_id: Option<EntityId>,
    /// Overrides the group recorded on the expense
    #[serde(default)]
    pub group_id: Option<EntityId>,
}

impl AnalysisRequest {
    pub fn stored(expense_id: impl Into<EntityId>) -> Self {
        Self {
            expense: ExpenseRef::Stored(expense_id.into()),
            payer_id: None,
            group_id: None,
        }
    }

    pub fn inline(expense: ExpenseRecord) -> Self {
        Self {
            expense: ExpenseRef::Inline(expense),
            payer_id: None,
            group_id: None,
        }
    }
}
