//! Run persistence adapter: maps domain values onto `AnalysisStore` records.
//!
//! Writes are best effort. A failed write is logged with
//! `event = "store.write_failed"` and the run carries on; the in-memory
//! [`Run`] stays the source of truth for status queries.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tribunal_state::{
    AnalysisStore, ContentDigest, FindingRecord, QualityRecord, RunId, RunRecord,
    StageExecutionRecord, StatusEventRecord, StorageResult,
};

use crate::domain::event::StatusEvent;
use crate::domain::finding::Finding;
use crate::domain::quality::QualityAssessment;
use crate::domain::report::Recommendation;
use crate::domain::run::{Run, RunStatus, StageExecution, StageKind, StageStatus};
use crate::obs;

/// Records one run's lifecycle into an [`AnalysisStore`].
#[derive(Clone)]
pub struct RunRecorder {
    store: Arc<dyn AnalysisStore>,
    run_id: RunId,
    request_digest: ContentDigest,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn AnalysisStore>, run_id: RunId, request_digest: ContentDigest) -> Self {
        Self {
            store,
            run_id,
            request_digest,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn settle(&self, operation: &str, result: StorageResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                obs::emit_store_write_failed(&self.run_id, operation, &err);
                false
            }
        }
    }

    fn to_payload<T: Serialize>(&self, operation: &str, value: &T) -> Option<serde_json::Value> {
        match serde_json::to_value(value) {
            Ok(payload) => Some(payload),
            Err(err) => {
                obs::emit_store_write_failed(&self.run_id, operation, &err);
                None
            }
        }
    }

    fn run_record(&self, run: &Run) -> RunRecord {
        RunRecord {
            run_id: run.run_id.clone(),
            request_digest: self.request_digest.clone(),
            status: run.status.to_record(),
            total_budget: run.total_budget,
            tokens_used: run.tokens_used,
            quality_score: run.quality_score,
            standard_met: run.standard_met,
            recommendation: run.recommendation.map(|r| r.as_str().to_string()),
            failure: run
                .failure
                .as_ref()
                .and_then(|f| self.to_payload("update_run", f)),
            created_at: run.created_at,
            completed_at: run.finished_at,
        }
    }

    pub async fn create_run(&self, run: &Run) -> bool {
        let result = self.store.create_run(self.run_record(run)).await;
        self.settle("create_run", result)
    }

    pub async fn update_run(&self, run: &Run) -> bool {
        let result = self.store.update_run(self.run_record(run)).await;
        self.settle("update_run", result)
    }

    /// Upsert one stage execution. `summary` is only known once the stage completes.
    pub async fn update_stage(&self, stage: &StageExecution, summary: Option<&str>) -> bool {
        let record = StageExecutionRecord {
            run_id: self.run_id.clone(),
            stage: stage.stage.name().to_string(),
            execution_order: stage.execution_order,
            status: stage.status.to_record(),
            allocated_tokens: stage.allocated_budget,
            consumed_tokens: stage.consumed_tokens,
            retry_count: stage.retry_count,
            confidence: stage.confidence,
            quality_score: stage.quality.as_ref().map(|q| q.aggregate),
            summary: summary.map(str::to_string),
            error: stage.error.clone(),
            updated_at: Utc::now(),
        };
        let result = self.store.update_stage_execution(record).await;
        self.settle("update_stage_execution", result)
    }

    /// Append a stage's findings, numbered from 1 in extraction order.
    ///
    /// Returns how many were stored.
    pub async fn append_findings(&self, stage: StageKind, findings: &[Finding]) -> usize {
        let mut stored = 0;
        for (index, finding) in findings.iter().enumerate() {
            let Some(payload) = self.to_payload("append_finding", finding) else {
                continue;
            };
            let digest = ContentDigest::from_bytes(payload.to_string().as_bytes());
            let record = FindingRecord {
                run_id: self.run_id.clone(),
                stage: stage.name().to_string(),
                execution_order: stage.execution_order(),
                seq: index as u32 + 1,
                title: finding.title.clone(),
                severity: finding.severity.name().to_string(),
                category: finding.category.name().to_string(),
                confidence: finding.confidence,
                payload,
                digest,
            };
            let result = self.store.append_finding(record).await;
            if self.settle("append_finding", result) {
                stored += 1;
            }
        }
        stored
    }

    /// `scope` is a stage name, or `run` for the run-level assessment.
    pub async fn record_quality(&self, scope: &str, assessment: &QualityAssessment) -> bool {
        let Some(payload) = self.to_payload("record_quality_assessment", assessment) else {
            return false;
        };
        let record = QualityRecord {
            run_id: self.run_id.clone(),
            scope: scope.to_string(),
            aggregate: assessment.aggregate,
            standard_met: assessment.standard_met,
            payload,
            recorded_at: Utc::now(),
        };
        let result = self.store.record_quality_assessment(record).await;
        self.settle("record_quality_assessment", result)
    }

    pub async fn record_event(&self, event: &StatusEvent) -> bool {
        let Some(payload) = self.to_payload("record_status_event", event) else {
            return false;
        };
        let record = StatusEventRecord {
            run_id: self.run_id.clone(),
            seq: event.seq,
            stage: event.scope.name().to_string(),
            status: event.status.name().to_string(),
            progress: event.progress,
            payload,
            timestamp: event.timestamp,
        };
        let result = self.store.record_status_event(record).await;
        self.settle("record_status_event", result)
    }
}

/// Rebuild a run from its stored records.
///
/// Used once the in-memory run has been retired. Stage findings and
/// assessments whose payloads no longer decode are left out.
pub async fn load_run(store: &dyn AnalysisStore, run_id: &RunId) -> StorageResult<Run> {
    let record = store.get_run(run_id).await?;
    let executions = store.get_stage_executions(run_id).await?;
    let mut findings = store.get_findings(run_id).await?;
    let assessments = store.get_quality_assessments(run_id).await?;

    let mut run = Run::new(record.run_id);
    run.total_budget = record.total_budget;
    run.status = RunStatus::from_record(record.status);
    run.tokens_used = record.tokens_used;
    run.quality_score = record.quality_score;
    run.standard_met = record.standard_met;
    run.recommendation = record
        .recommendation
        .and_then(|name| serde_json::from_value::<Recommendation>(name.into()).ok());
    run.failure = record.failure.and_then(|f| serde_json::from_value(f).ok());
    run.created_at = record.created_at;
    run.finished_at = record.completed_at;

    for execution in executions {
        let Some(stage) = StageKind::from_name(&execution.stage) else {
            continue;
        };
        let target = run.stage_mut(stage);
        target.status = StageStatus::from_record(execution.status);
        target.allocated_budget = execution.allocated_tokens;
        target.consumed_tokens = execution.consumed_tokens;
        target.retry_count = execution.retry_count;
        target.confidence = execution.confidence;
        target.error = execution.error;
        if execution.status.is_terminal() {
            target.finished_at = Some(execution.updated_at);
        }
    }

    findings.sort_by_key(|f| (f.execution_order, f.seq));
    for record in findings {
        let Some(stage) = StageKind::from_name(&record.stage) else {
            continue;
        };
        if let Ok(finding) = serde_json::from_value::<Finding>(record.payload) {
            run.stage_mut(stage).findings.push(finding);
        }
    }

    for record in assessments {
        let Some(stage) = StageKind::from_name(&record.scope) else {
            continue;
        };
        run.stage_mut(stage).quality = serde_json::from_value(record.payload).ok();
    }
    Ok(run)
}
