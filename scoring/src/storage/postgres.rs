use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tracing::{debug, info};

use super::{AnalysisStorage, RuleStorage};
use crate::{
    context_builder::ExpenseStore,
    error::ScoringError,
    model::{
        AnalysisId, Classification, EntityId, ExpenseRecord, FraudAnalysis, FraudRule, Participant, RuleCategory,
        RuleStatistics, RuleVersion,
    },
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS expenses (
        id TEXT PRIMARY KEY,
        payer_id TEXT NOT NULL,
        group_id TEXT,
        amount DOUBLE PRECISION NOT NULL,
        currency TEXT,
        category TEXT,
        description TEXT,
        merchant TEXT,
        has_receipt BOOLEAN NOT NULL DEFAULT FALSE,
        participants JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS expenses_payer_idx ON expenses (payer_id, created_at)",
    "CREATE INDEX IF NOT EXISTS expenses_group_idx ON expenses (group_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS fraud_rules (
        id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        active BOOLEAN NOT NULL,
        version INTEGER NOT NULL,
        definition JSONB NOT NULL,
        trigger_count BIGINT NOT NULL DEFAULT 0,
        true_positives BIGINT NOT NULL DEFAULT 0,
        false_positives BIGINT NOT NULL DEFAULT 0,
        last_triggered_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fraud_rule_versions (
        rule_id TEXT NOT NULL REFERENCES fraud_rules (id),
        version INTEGER NOT NULL,
        snapshot JSONB NOT NULL,
        replaced_at TIMESTAMPTZ NOT NULL,
        replaced_by TEXT,
        PRIMARY KEY (rule_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fraud_analyses (
        id UUID PRIMARY KEY,
        expense_id TEXT,
        payer_id TEXT NOT NULL,
        fraud_score DOUBLE PRECISION NOT NULL,
        requires_review BOOLEAN NOT NULL,
        review_status TEXT NOT NULL,
        revision INTEGER NOT NULL,
        document JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS fraud_analyses_review_idx ON fraud_analyses (review_status, requires_review, fraud_score DESC)",
];

/// PostgreSQL-backed store. Rule and analysis documents live in JSONB
/// columns; counters and review fields that are filtered or incremented
/// concurrently have their own columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str) -> Result<Self, ScoringError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), ScoringError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Fraud schema ready");
        Ok(())
    }

    pub async fn insert_expense(&self, expense: &ExpenseRecord) -> Result<(), ScoringError> {
        let id = expense
            .id
            .clone()
            .ok_or_else(|| ScoringError::InvalidInput("expense id is required".to_string()))?;
        let payer_id = expense
            .payer_id
            .clone()
            .ok_or_else(|| ScoringError::InvalidInput("payer id is required".to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO expenses (id, payer_id, group_id, amount, currency, category, description, merchant,
                                  has_receipt, participants, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(id)
        .bind(payer_id)
        .bind(&expense.group_id)
        .bind(expense.amount)
        .bind(&expense.currency)
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(&expense.merchant)
        .bind(expense.has_receipt)
        .bind(Json(&expense.participants))
        .bind(expense.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expenses_where(
        &self,
        column: &str,
        value: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExpenseRecord>, ScoringError> {
        let statement = format!(
            "SELECT * FROM expenses WHERE {} = $1 AND created_at >= $2 ORDER BY created_at",
            column
        );
        let rows = sqlx::query(&statement)
            .bind(value)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(expense_from_row).collect()
    }
}

fn expense_from_row(row: &PgRow) -> Result<ExpenseRecord, ScoringError> {
    let participants: Json<Vec<Participant>> = row.try_get("participants")?;
    Ok(ExpenseRecord {
        id: Some(row.try_get("id")?),
        payer_id: Some(row.try_get("payer_id")?),
        group_id: row.try_get("group_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        merchant: row.try_get("merchant")?,
        timestamp: row.try_get("created_at")?,
        has_receipt: row.try_get("has_receipt")?,
        participants: participants.0,
    })
}

fn rule_from_row(row: &PgRow) -> Result<FraudRule, ScoringError> {
    let Json(mut rule): Json<FraudRule> = row.try_get("definition")?;
    rule.version = row.try_get::<i32, _>("version")? as u32;
    rule.active = row.try_get("active")?;
    rule.statistics = RuleStatistics {
        trigger_count: row.try_get::<i64, _>("trigger_count")? as u64,
        true_positives: row.try_get::<i64, _>("true_positives")? as u64,
        false_positives: row.try_get::<i64, _>("false_positives")? as u64,
        last_triggered_at: row.try_get("last_triggered_at")?,
    };
    Ok(rule)
}

fn analysis_from_row(row: &PgRow) -> Result<FraudAnalysis, ScoringError> {
    let Json(analysis): Json<FraudAnalysis> = row.try_get("document")?;
    Ok(analysis)
}

#[async_trait]
impl RuleStorage for PgStore {
    async fn list_rules(&self) -> Result<Vec<FraudRule>, ScoringError> {
        let rows = sqlx::query("SELECT * FROM fraud_rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn get_active_rules(&self, category: Option<RuleCategory>) -> Result<Vec<FraudRule>, ScoringError> {
        let rows = sqlx::query("SELECT * FROM fraud_rules WHERE active AND ($1::TEXT IS NULL OR category = $1)")
            .bind(category.map(|c| c.to_string()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Option<FraudRule>, ScoringError> {
        let row = sqlx::query("SELECT * FROM fraud_rules WHERE id = $1")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    async fn create_rule(&self, rule: &FraudRule) -> Result<(), ScoringError> {
        let result = sqlx::query(
            r#"
            INSERT INTO fraud_rules (id, category, active, version, definition,
                                     trigger_count, true_positives, false_positives, last_triggered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&rule.id)
        .bind(rule.category.to_string())
        .bind(rule.active)
        .bind(rule.version as i32)
        .bind(Json(rule))
        .bind(rule.statistics.trigger_count as i64)
        .bind(rule.statistics.true_positives as i64)
        .bind(rule.statistics.false_positives as i64)
        .bind(rule.statistics.last_triggered_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ScoringError::InvalidInput(format!("rule {} already exists", rule.id)));
        }
        Ok(())
    }

    async fn update_rule(
        &self,
        rule: &FraudRule,
        editor: &str,
        at: DateTime<Utc>,
    ) -> Result<FraudRule, ScoringError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM fraud_rules WHERE id = $1 FOR UPDATE")
            .bind(&rule.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ScoringError::not_found("rule", &rule.id))?;
        let current = rule_from_row(&row)?;

        sqlx::query(
            r#"
            INSERT INTO fraud_rule_versions (rule_id, version, snapshot, replaced_at, replaced_by)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&current.id)
        .bind(current.version as i32)
        .bind(Json(&current))
        .bind(at)
        .bind(editor)
        .execute(&mut *tx)
        .await?;

        let mut updated = rule.clone();
        updated.version = current.version + 1;
        updated.statistics = current.statistics;
        updated.updated_by = Some(editor.to_string());
        updated.updated_at = Some(at);

        sqlx::query("UPDATE fraud_rules SET category = $2, active = $3, version = $4, definition = $5 WHERE id = $1")
            .bind(&updated.id)
            .bind(updated.category.to_string())
            .bind(updated.active)
            .bind(updated.version as i32)
            .bind(Json(&updated))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(rule_id = %updated.id, version = updated.version, "Rule updated");
        Ok(updated)
    }

    async fn rule_versions(&self, rule_id: &str) -> Result<Vec<RuleVersion>, ScoringError> {
        let rows = sqlx::query("SELECT * FROM fraud_rule_versions WHERE rule_id = $1 ORDER BY version")
            .bind(rule_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let Json(snapshot): Json<FraudRule> = row.try_get("snapshot")?;
                Ok(RuleVersion {
                    rule_id: row.try_get("rule_id")?,
                    version: row.try_get::<i32, _>("version")? as u32,
                    snapshot,
                    replaced_at: row.try_get("replaced_at")?,
                    replaced_by: row.try_get("replaced_by")?,
                })
            })
            .collect()
    }

    async fn record_triggers(&self, rule_ids: &[EntityId], at: DateTime<Utc>) -> Result<(), ScoringError> {
        if rule_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE fraud_rules
            SET trigger_count = trigger_count + 1,
                last_triggered_at = GREATEST(COALESCE(last_triggered_at, $2), $2)
            WHERE id = ANY($1)
            "#,
        )
        .bind(rule_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_feedback(
        &self,
        rule_ids: &[EntityId],
        classification: Classification,
    ) -> Result<(), ScoringError> {
        let statement = match classification {
            Classification::TruePositive => {
                "UPDATE fraud_rules SET true_positives = true_positives + 1 WHERE id = ANY($1)"
            }
            Classification::FalsePositive => {
                "UPDATE fraud_rules SET false_positives = false_positives + 1 WHERE id = ANY($1)"
            }
            Classification::TrueNegative | Classification::FalseNegative => return Ok(()),
        };
        if rule_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(statement).bind(rule_ids).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalysisStorage for PgStore {
    async fn save_analysis(&self, analysis: &FraudAnalysis) -> Result<(), ScoringError> {
        sqlx::query(
            r#"
            INSERT INTO fraud_analyses (id, expense_id, payer_id, fraud_score, requires_review, review_status,
                                        revision, document, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(analysis.id())
        .bind(analysis.expense_id())
        .bind(analysis.payer_id())
        .bind(analysis.fraud_score())
        .bind(analysis.requires_review())
        .bind(analysis.review_status().to_string())
        .bind(analysis.revision() as i32)
        .bind(Json(analysis))
        .bind(analysis.created_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_analysis(&self, analysis_id: AnalysisId) -> Result<Option<FraudAnalysis>, ScoringError> {
        let row = sqlx::query("SELECT document FROM fraud_analyses WHERE id = $1")
            .bind(analysis_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(analysis_from_row).transpose()
    }

    async fn update_analysis(&self, analysis: &FraudAnalysis, expected_revision: u32) -> Result<(), ScoringError> {
        let result = sqlx::query(
            r#"
            UPDATE fraud_analyses
            SET review_status = $3, revision = $4, document = $5
            WHERE id = $1 AND revision = $2
            "#,
        )
        .bind(analysis.id())
        .bind(expected_revision as i32)
        .bind(analysis.review_status().to_string())
        .bind(analysis.revision() as i32)
        .bind(Json(analysis))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM fraud_analyses WHERE id = $1")
                .bind(analysis.id())
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                ScoringError::Conflict(analysis.id())
            } else {
                ScoringError::not_found("analysis", analysis.id().to_string())
            });
        }
        Ok(())
    }

    async fn pending_reviews(&self, limit: usize) -> Result<Vec<FraudAnalysis>, ScoringError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM fraud_analyses
            WHERE review_status = 'PENDING' AND requires_review
            ORDER BY fraud_score DESC, created_at, id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(analysis_from_row).collect()
    }
}

#[async_trait]
impl ExpenseStore for PgStore {
    async fn get_expense(&self, expense_id: &str) -> Result<Option<ExpenseRecord>, ScoringError> {
        let row = sqlx::query("SELECT * FROM expenses WHERE id = $1")
            .bind(expense_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(expense_from_row).transpose()
    }

    async fn user_history(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError> {
        self.expenses_where("payer_id", user_id, since).await
    }

    async fn group_history(&self, group_id: &str, since: DateTime<Utc>) -> Result<Vec<ExpenseRecord>, ScoringError> {
        self.expenses_where("group_id", group_id, since).await
    }
}
