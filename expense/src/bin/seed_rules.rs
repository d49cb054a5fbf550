use std::error::Error;

use chrono::Utc;
use expense::default_rules::default_rules;
use scoring::{
    executable_utils::{initialize_executable, initialize_tracing},
    rules::validate_rule,
    storage::{PgStore, RuleStorage},
};

/// Installs the default rule catalogue. Rules that already exist are left
/// untouched so administrator edits survive a re-run.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = initialize_executable()?;
    initialize_tracing(&config.analyzer.log_level);

    let store = PgStore::new(&config.common.database_url).await?;
    store.ensure_schema().await?;

    let mut created = 0;
    let mut skipped = 0;
    for mut rule in default_rules(&config.rules) {
        validate_rule(&rule)?;
        if store.get_rule(&rule.id).await?.is_some() {
            tracing::debug!(rule_id = %rule.id, "Rule already present");
            skipped += 1;
            continue;
        }
        rule.updated_by = Some("seed_rules".to_string());
        rule.updated_at = Some(Utc::now());
        store.create_rule(&rule).await?;
        tracing::info!(rule_id = %rule.id, score_impact = rule.score_impact, "Rule installed");
        created += 1;
    }

    tracing::info!(created, skipped, "Default rules seeded");
    Ok(())
}
