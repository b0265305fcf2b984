//! Storage trait definitions for Tribunal
//!
//! The persistence collaborator stores one row per:
//! - run (`RunRecord`)
//! - stage execution within a run (`StageExecutionRecord`)
//! - extracted finding (`FindingRecord`)
//! - quality assessment (`QualityRecord`)
//! - status event (`StatusEventRecord`)
//!
//! Every write is idempotent on retry. Rows are keyed by run ID plus stage
//! plus sequence, so replaying a write overwrites the same row instead of
//! appending a duplicate. In-memory fakes live in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque unique identifier for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Lifecycle status as persisted. Covers both run and stage states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Running,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Running => "running",
            RecordStatus::Processing => "processing",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Completed | RecordStatus::Failed | RecordStatus::Cancelled
        )
    }
}

/// One pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    /// Digest of the canonical request JSON
    pub request_digest: ContentDigest,
    pub status: RecordStatus,
    pub total_budget: u64,
    pub tokens_used: u64,
    pub quality_score: Option<f64>,
    pub standard_met: Option<bool>,
    /// `proceed`, `proceed_with_conditions` or `do_not_proceed`
    pub recommendation: Option<String>,
    /// Failure details (stage, reason, tokens consumed, retry safety)
    pub failure: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One of the three stage executions within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecutionRecord {
    pub run_id: RunId,
    pub stage: String,
    pub execution_order: u8,
    pub status: RecordStatus,
    pub allocated_tokens: u64,
    pub consumed_tokens: u64,
    pub retry_count: u32,
    pub confidence: Option<f64>,
    pub quality_score: Option<f64>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One extracted finding, owned by a stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRecord {
    pub run_id: RunId,
    pub stage: String,
    pub execution_order: u8,
    /// Position within the stage's finding list
    pub seq: u32,
    pub title: String,
    pub severity: String,
    pub category: String,
    pub confidence: f64,
    /// Full finding as JSON
    pub payload: serde_json::Value,
    pub digest: ContentDigest,
}

/// A graded quality assessment for a stage (`scope` = stage name) or the
/// whole run (`scope` = `"run"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub run_id: RunId,
    pub scope: String,
    pub aggregate: f64,
    pub standard_met: bool,
    /// Full assessment, including sub-scores and rationale
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// One broadcast status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEventRecord {
    pub run_id: RunId,
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Stage name or `"system"`
    pub stage: String,
    pub status: String,
    pub progress: u8,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Build the idempotency key for a row from its identifying parts.
pub fn record_key(parts: &[&str]) -> String {
    parts.join(":")
}

// ---------------------------------------------------------------------------
// AnalysisStore
// ---------------------------------------------------------------------------

/// Persistence collaborator for pipeline runs.
///
/// Guarantees:
/// - Every write is an upsert keyed by (run ID, stage, sequence); retrying a
///   write never duplicates a row.
/// - Writes other than `create_run` fail with `RunNotFound` for unknown runs.
/// - Reads return rows in deterministic order (execution order, then seq).
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Create a run row. Idempotent on `run_id`.
    async fn create_run(&self, record: RunRecord) -> StorageResult<()>;

    /// Overwrite the run row (status transitions, aggregates).
    async fn update_run(&self, record: RunRecord) -> StorageResult<()>;

    /// Upsert a stage execution keyed by run ID + stage.
    async fn update_stage_execution(&self, record: StageExecutionRecord) -> StorageResult<()>;

    /// Upsert a finding keyed by run ID + stage + seq.
    async fn append_finding(&self, record: FindingRecord) -> StorageResult<()>;

    /// Upsert a quality assessment keyed by run ID + scope.
    async fn record_quality_assessment(&self, record: QualityRecord) -> StorageResult<()>;

    /// Upsert a status event keyed by run ID + seq.
    async fn record_status_event(&self, record: StatusEventRecord) -> StorageResult<()>;

    /// Retrieve a run by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Stage executions ordered by execution order.
    async fn get_stage_executions(&self, run_id: &RunId)
        -> StorageResult<Vec<StageExecutionRecord>>;

    /// Findings ordered by execution order, then seq.
    async fn get_findings(&self, run_id: &RunId) -> StorageResult<Vec<FindingRecord>>;

    /// Quality assessments for the run, ordered by scope.
    async fn get_quality_assessments(&self, run_id: &RunId) -> StorageResult<Vec<QualityRecord>>;

    /// Status events ordered by seq.
    async fn get_status_events(&self, run_id: &RunId) -> StorageResult<Vec<StatusEventRecord>>;
}
