//! SurrealDB schema migrations and initialization
//!
//! Sets up the five Tribunal tables with their indexes. Every row is
//! written through a deterministic record ID (see
//! [`crate::storage_traits::record_key`]), which is what makes writes
//! idempotent; the unique indexes below back that up at the database level.

use crate::error::StateError;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Tribunal tables in SurrealDB.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), StateError> {
    info!("Initializing Tribunal SurrealDB schema");

    init_runs_table(db).await?;
    init_stage_executions_table(db).await?;
    init_findings_table(db).await?;
    init_quality_table(db).await?;
    init_status_events_table(db).await?;

    info!("Tribunal schema initialization complete");
    Ok(())
}

async fn apply(db: &Surreal<Any>, table: &str, sql: &str) -> Result<(), StateError> {
    debug!(table, "Initializing table");
    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(format!("{table}: {e}")))?
        .check()
        .map_err(|e| StateError::SchemaSetup(format!("{table}: {e}")))?;
    Ok(())
}

/// `runs`: one row per run, keyed by `run_id`.
///
/// ```text
/// TABLE runs {
///   run_id, request_digest, status, total_budget, tokens_used,
///   quality_score?, standard_met?, recommendation?, failure?,
///   created_at, completed_at?
/// }
/// ```
async fn init_runs_table(db: &Surreal<Any>) -> Result<(), StateError> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_request_digest ON TABLE runs COLUMNS request_digest;
        DEFINE INDEX IF NOT EXISTS idx_status ON TABLE runs COLUMNS status;
    "#;
    apply(db, "runs", sql).await
}

/// `stage_executions`: three rows per run, keyed by `(run_id, stage)`.
async fn init_stage_executions_table(db: &Surreal<Any>) -> Result<(), StateError> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS stage_executions SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_stage ON TABLE stage_executions COLUMNS run_id, stage UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_run_order ON TABLE stage_executions COLUMNS run_id, execution_order;
    "#;
    apply(db, "stage_executions", sql).await
}

/// `findings`: keyed by `(run_id, stage, seq)`. Findings are immutable once
/// written, so a replayed write carries identical content.
async fn init_findings_table(db: &Surreal<Any>) -> Result<(), StateError> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS findings SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_stage_seq ON TABLE findings COLUMNS run_id, stage, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_severity ON TABLE findings COLUMNS severity;
    "#;
    apply(db, "findings", sql).await
}

/// `quality_assessments`: keyed by `(run_id, scope)`.
async fn init_quality_table(db: &Surreal<Any>) -> Result<(), StateError> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS quality_assessments SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_scope ON TABLE quality_assessments COLUMNS run_id, scope UNIQUE;
    "#;
    apply(db, "quality_assessments", sql).await
}

/// `status_events`: append-only, keyed by `(run_id, seq)`.
async fn init_status_events_table(db: &Surreal<Any>) -> Result<(), StateError> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS status_events SCHEMALESS
            PERMISSIONS
                FOR select, create, update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_seq ON TABLE status_events COLUMNS run_id, seq UNIQUE;
    "#;
    apply(db, "status_events", sql).await
}
