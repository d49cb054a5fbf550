use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::ScoringError,
    model::{
        AnalysisContext, AnalysisRequest, DerivedSignals, EntityId, ExpenseAttributes, ExpenseRecord, ExpenseRef,
        GroupContext, HistoryStats, PayerContext, TimingContext,
    },
};

/// Read-only view of the surrounding expense system.
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn get_expense(&self, expense_id: &str) -> Result<Option<ExpenseRecord>, ScoringError>;

    /// Expenses paid by `user_id` at or after `since`.
    async fn user_history(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError>;

    /// Expenses of `group_id` at or after `since`.
    async fn group_history(&self, group_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError>;
}

/// Turns an analysis request into an [`AnalysisContext`].
pub struct ContextBuilder {
    expenses: Arc<dyn ExpenseStore>,
    history_window: Duration,
}

impl ContextBuilder {
    pub fn new(expenses: Arc<dyn ExpenseStore>, history_window: Duration) -> Self {
        Self {
            expenses,
            history_window,
        }
    }

    pub async fn build(&self, request: &AnalysisRequest) -> Result<AnalysisContext, ScoringError> {
        let record = match &request.expense {
            ExpenseRef::Inline(record) => record.clone(),
            ExpenseRef::Stored(expense_id) => self
                .expenses
                .get_expense(expense_id)
                .await?
                .ok_or_else(|| ScoringError::ContextBuild(format!("expense {} not found", expense_id)))?,
        };

        if !record.amount.is_finite() {
            return Err(ScoringError::ContextBuild(format!(
                "expense amount {} is not a number",
                record.amount
            )));
        }

        let payer_id = non_blank(request.payer_id.as_ref())
            .or_else(|| non_blank(record.payer_id.as_ref()))
            .ok_or_else(|| ScoringError::ContextBuild("payer id is required".to_string()))?;
        let group_id = non_blank(request.group_id.as_ref()).or_else(|| non_blank(record.group_id.as_ref()));

        let since = record.timestamp - self.history_window;
        let (payer_window, group_window) = tokio::try_join!(
            self.expenses.user_history(&payer_id, since),
            async {
                match &group_id {
                    Some(group_id) => self.expenses.group_history(group_id, since).await,
                    None => Ok(Vec::new()),
                }
            }
        )?;

        let exclude = record.id.as_deref();
        let payer_history = HistoryStats::from_window(&payer_window, record.amount, record.timestamp, exclude);
        let group_history = HistoryStats::from_window(&group_window, record.amount, record.timestamp, exclude);

        debug!(
            expense_id = ?record.id,
            payer_id = %payer_id,
            group_id = ?group_id,
            payer_history = payer_history.count,
            group_history = group_history.count,
            "Built analysis context"
        );

        let derived = DerivedSignals::compute(record.amount, &payer_history, &group_history);
        Ok(AnalysisContext::new(
            ExpenseAttributes::from_record(&record, &payer_id),
            PayerContext {
                id: payer_id,
                history: payer_history,
            },
            GroupContext {
                id: group_id,
                history: group_history,
            },
            TimingContext::at(record.timestamp),
            derived,
        ))
    }
}

fn non_blank(value: Option<&EntityId>) -> Option<EntityId> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}
