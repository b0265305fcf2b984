//! Run and stage execution tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tribunal_state::{RecordStatus, RunId};

use crate::budget::{SKEPTIC_ALLOCATION, SYNTHESIS_ALLOCATION, TOTAL_BUDGET, VALIDATOR_ALLOCATION};
use crate::domain::finding::Finding;
use crate::domain::quality::QualityAssessment;
use crate::domain::report::Recommendation;

/// The three fixed stages of a run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Adversarial risk hunt over the caller's context.
    Skeptic,
    /// Evidence check of every skeptic finding.
    Validator,
    /// Final recommendation drawing on both prior stages.
    Synthesis,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 3] = [StageKind::Skeptic, StageKind::Validator, StageKind::Synthesis];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Skeptic => "skeptic",
            StageKind::Validator => "validator",
            StageKind::Synthesis => "synthesis",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.name() == name)
    }

    /// 1-based execution order.
    pub fn execution_order(&self) -> u8 {
        match self {
            StageKind::Skeptic => 1,
            StageKind::Validator => 2,
            StageKind::Synthesis => 3,
        }
    }

    /// Zero-based slot, for fixed-size per-stage tables.
    pub(crate) fn index(&self) -> usize {
        usize::from(self.execution_order() - 1)
    }

    /// Fixed token allocation for this stage.
    pub fn allocation(&self) -> u64 {
        match self {
            StageKind::Skeptic => SKEPTIC_ALLOCATION,
            StageKind::Validator => VALIDATOR_ALLOCATION,
            StageKind::Synthesis => SYNTHESIS_ALLOCATION,
        }
    }

    /// Run-level progress range covered by this stage: 0-33, 33-66, 66-100.
    pub fn progress_span(&self) -> (u8, u8) {
        match self {
            StageKind::Skeptic => (0, 33),
            StageKind::Validator => (33, 66),
            StageKind::Synthesis => (66, 100),
        }
    }

    /// Progress at `fraction` (0.0-1.0) of the way through this stage.
    pub fn progress_at(&self, fraction: f64) -> u8 {
        let (start, end) = self.progress_span();
        let width = f64::from(end - start);
        let offset = (width * fraction.clamp(0.0, 1.0)).round() as u8;
        start + offset
    }

    /// Skeptic and validator hunt for risks; synthesis concludes.
    pub fn is_risk_stage(&self) -> bool {
        !matches!(self, StageKind::Synthesis)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn to_record(self) -> RecordStatus {
        match self {
            RunStatus::Pending => RecordStatus::Pending,
            RunStatus::Running => RecordStatus::Running,
            RunStatus::Completed => RecordStatus::Completed,
            RunStatus::Failed => RecordStatus::Failed,
            RunStatus::Cancelled => RecordStatus::Cancelled,
        }
    }

    pub fn from_record(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Pending => RunStatus::Pending,
            RecordStatus::Running | RecordStatus::Processing => RunStatus::Running,
            RecordStatus::Completed => RunStatus::Completed,
            RecordStatus::Failed => RunStatus::Failed,
            RecordStatus::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Status of one stage execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    pub fn to_record(self) -> RecordStatus {
        match self {
            StageStatus::Pending => RecordStatus::Pending,
            StageStatus::Processing => RecordStatus::Processing,
            StageStatus::Completed => RecordStatus::Completed,
            StageStatus::Failed => RecordStatus::Failed,
        }
    }

    /// Stages are never cancelled on their own; a cancelled record reads as failed.
    pub fn from_record(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Pending => StageStatus::Pending,
            RecordStatus::Running | RecordStatus::Processing => StageStatus::Processing,
            RecordStatus::Completed => StageStatus::Completed,
            RecordStatus::Failed | RecordStatus::Cancelled => StageStatus::Failed,
        }
    }
}

/// One stage execution within a run. Created `pending` when the run starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageExecution {
    pub stage: StageKind,
    pub execution_order: u8,
    pub allocated_budget: u64,
    pub consumed_tokens: u64,
    pub status: StageStatus,
    pub findings: Vec<Finding>,
    pub confidence: Option<f64>,
    pub quality: Option<QualityAssessment>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageExecution {
    pub fn pending(stage: StageKind) -> Self {
        Self {
            stage,
            execution_order: stage.execution_order(),
            allocated_budget: stage.allocation(),
            consumed_tokens: 0,
            status: StageStatus::Pending,
            findings: Vec::new(),
            confidence: None,
            quality: None,
            retry_count: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Why a run failed, surfaced to the caller with the partial run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    /// Stage that failed, if the failure was stage-local.
    pub stage: Option<StageKind>,
    pub reason: String,
    /// Tokens committed across all stages before the failure.
    pub tokens_consumed: u64,
    /// Whether re-submitting is safe. Committed stages are never re-run.
    pub retry_safe: bool,
}

/// One end-to-end execution of the three-stage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: RunId,
    pub total_budget: u64,
    pub status: RunStatus,
    pub quality_score: Option<f64>,
    pub standard_met: Option<bool>,
    pub recommendation: Option<Recommendation>,
    pub tokens_used: u64,
    pub stages: Vec<StageExecution>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of a run returned by status queries.
pub type RunSnapshot = Run;

impl Run {
    /// Create a pending run with all three stages pre-allocated.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            total_budget: TOTAL_BUDGET,
            status: RunStatus::Pending,
            quality_score: None,
            standard_met: None,
            recommendation: None,
            tokens_used: 0,
            stages: StageKind::ALL.iter().map(|s| StageExecution::pending(*s)).collect(),
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn stage(&self, kind: StageKind) -> &StageExecution {
        &self.stages[kind.index()]
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> &mut StageExecution {
        &mut self.stages[kind.index()]
    }

    /// Sum of per-stage consumed tokens.
    pub fn stage_tokens(&self) -> u64 {
        self.stages.iter().map(|s| s.consumed_tokens).sum()
    }
}
