//! SurrealDB-backed AnalysisStore implementation
//!
//! Each write is an `UPSERT` on a deterministic record ID built from
//! [`record_key`], so replaying a write after a transient failure lands on
//! the same row.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::storage_traits::{
    record_key, AnalysisStore, FindingRecord, QualityRecord, RunId, RunRecord,
    StageExecutionRecord, StatusEventRecord, StorageResult,
};

const NAMESPACE: &str = "tribunal";
const DATABASE: &str = "main";

/// SurrealDB-backed implementation of [`AnalysisStore`].
pub struct SurrealAnalysisStore {
    db: Surreal<Any>,
}

impl SurrealAnalysisStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `tribunal/main`, and runs `init_schema`.
    pub async fn in_memory() -> Result<Self, StateError> {
        let store = Self::connect("mem://").await?;
        info!("SurrealAnalysisStore connected (in-memory)");
        Ok(store)
    }

    /// Connect to an explicit endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// Uses `SURREALDB_URL` when set; otherwise falls back to local
    /// persistence under `.tribunal/db`.
    pub async fn from_env() -> Result<Self, StateError> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            let store = Self::connect(&url).await?;
            info!("SurrealAnalysisStore connected ({})", url);
            return Ok(store);
        }

        let path = ".tribunal/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                path, e
            ))
        })?;
        let url = format!("surrealkv://{}", path);
        info!("No SURREALDB_URL found, using local persistence: {}", url);
        Self::connect(&url).await
    }

    // -- private helpers -----------------------------------------------------

    async fn upsert<T>(&self, table: &'static str, key: String, record: T) -> StorageResult<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        debug!(table, key = %key, "upserting record");
        let _stored: Option<T> = self.db.upsert((table, key)).content(record).await?;
        Ok(())
    }

    async fn select_for_run<T>(&self, sql: &'static str, run_id: &RunId) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut res = self.db.query(sql).bind(("rid", run_id.0.clone())).await?;
        let rows: Vec<T> = res.take(0)?;
        Ok(rows)
    }

    /// Fetch a run row by ID, returning RunNotFound when absent.
    async fn fetch_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let rows: Vec<RunRecord> = self
            .select_for_run("SELECT * FROM runs WHERE run_id = $rid", run_id)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }
}

#[async_trait]
impl AnalysisStore for SurrealAnalysisStore {
    async fn create_run(&self, record: RunRecord) -> StorageResult<()> {
        if self.fetch_run(&record.run_id).await.is_ok() {
            return Ok(());
        }
        let key = record.run_id.0.clone();
        self.upsert("runs", key, record).await
    }

    async fn update_run(&self, record: RunRecord) -> StorageResult<()> {
        self.fetch_run(&record.run_id).await?;
        let key = record.run_id.0.clone();
        self.upsert("runs", key, record).await
    }

    async fn update_stage_execution(&self, record: StageExecutionRecord) -> StorageResult<()> {
        self.fetch_run(&record.run_id).await?;
        let key = record_key(&[record.run_id.as_str(), &record.stage]);
        self.upsert("stage_executions", key, record).await
    }

    async fn append_finding(&self, record: FindingRecord) -> StorageResult<()> {
        self.fetch_run(&record.run_id).await?;
        let seq = record.seq.to_string();
        let key = record_key(&[record.run_id.as_str(), &record.stage, &seq]);
        self.upsert("findings", key, record).await
    }

    async fn record_quality_assessment(&self, record: QualityRecord) -> StorageResult<()> {
        self.fetch_run(&record.run_id).await?;
        let key = record_key(&[record.run_id.as_str(), &record.scope]);
        self.upsert("quality_assessments", key, record).await
    }

    async fn record_status_event(&self, record: StatusEventRecord) -> StorageResult<()> {
        self.fetch_run(&record.run_id).await?;
        let seq = record.seq.to_string();
        let key = record_key(&[record.run_id.as_str(), &seq]);
        self.upsert("status_events", key, record).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.fetch_run(run_id).await
    }

    async fn get_stage_executions(
        &self,
        run_id: &RunId,
    ) -> StorageResult<Vec<StageExecutionRecord>> {
        self.fetch_run(run_id).await?;
        self.select_for_run(
            "SELECT * FROM stage_executions WHERE run_id = $rid ORDER BY execution_order ASC",
            run_id,
        )
        .await
    }

    async fn get_findings(&self, run_id: &RunId) -> StorageResult<Vec<FindingRecord>> {
        self.fetch_run(run_id).await?;
        self.select_for_run(
            "SELECT * FROM findings WHERE run_id = $rid ORDER BY execution_order ASC, seq ASC",
            run_id,
        )
        .await
    }

    async fn get_quality_assessments(&self, run_id: &RunId) -> StorageResult<Vec<QualityRecord>> {
        self.fetch_run(run_id).await?;
        self.select_for_run(
            "SELECT * FROM quality_assessments WHERE run_id = $rid ORDER BY scope ASC",
            run_id,
        )
        .await
    }

    async fn get_status_events(&self, run_id: &RunId) -> StorageResult<Vec<StatusEventRecord>> {
        self.fetch_run(run_id).await?;
        self.select_for_run(
            "SELECT * FROM status_events WHERE run_id = $rid ORDER BY seq ASC",
            run_id,
        )
        .await
    }
}
