//! Pipeline orchestrator
//!
//! Drives one run through skeptic -> validator -> synthesis. Each stage
//! starts only after its predecessor completed, and a stage that exhausts
//! its retries fails the run: later stages stay `pending`.
//!
//! Retry policy per stage:
//! - transient errors (timeouts, empty responses, retryable provider
//!   errors) get up to `max_retries` further attempts with exponential backoff
//! - a budget denial gets exactly one further attempt with the compact prompt
//! - ledger contract violations are fatal immediately
//!
//! Cancellation is checked between stages and between attempts, never during
//! a model call.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tribunal_llm::TextGenerator;
use tribunal_state::{AnalysisStore, ContentDigest, RunId};

use crate::broadcast::Broadcaster;
use crate::budget::BudgetLedger;
use crate::config::PipelineConfig;
use crate::domain::error::{Result, StageError, TribunalError};
use crate::domain::event::{EventScope, EventStatus, QualityMetrics};
use crate::domain::report::{Recommendation, StageResult, StageSummary, ValidationReport};
use crate::domain::request::ValidationRequest;
use crate::domain::run::{Run, RunFailure, RunStatus, StageKind, StageStatus};
use crate::executor::{StageContext, StageExecutor};
use crate::extract::FindingExtractor;
use crate::metrics::METRICS;
use crate::obs;
use crate::progress::ProgressReporter;
use crate::recording::RunRecorder;

/// Shared, mutable view of a run: written by the pipeline, read by status queries.
#[derive(Debug)]
pub struct RunCell {
    run: RwLock<Run>,
}

impl RunCell {
    pub fn new(run: Run) -> Self {
        Self {
            run: RwLock::new(run),
        }
    }

    pub fn snapshot(&self) -> Run {
        self.run
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut Run) -> T) -> T {
        let mut run = self.run.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut run)
    }
}

/// Why a stage stopped without a result.
enum Interrupt {
    Failed { error: StageError, attempts: u32 },
    Cancelled,
}

/// Per-run state threaded through the stages.
struct RunScope<'a> {
    run_id: RunId,
    request: &'a ValidationRequest,
    cell: &'a RunCell,
    cancel: &'a CancellationToken,
    ledger: BudgetLedger,
    recorder: RunRecorder,
    progress: ProgressReporter,
    started_at: DateTime<Utc>,
}

impl RunScope<'_> {
    fn duration_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

pub struct Pipeline {
    executor: StageExecutor,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn AnalysisStore>,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        extractor: Arc<FindingExtractor>,
        store: Arc<dyn AnalysisStore>,
        broadcaster: Arc<Broadcaster>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            executor: StageExecutor::new(generator, extractor, config),
            broadcaster,
            store,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.executor.config()
    }

    /// Execute the run held in `cell` to a terminal state.
    ///
    /// On failure or cancellation the partial run stays in `cell` (and in the
    /// store), with every completed stage intact.
    pub async fn run(
        &self,
        request: &ValidationRequest,
        request_digest: ContentDigest,
        cell: &RunCell,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        let run_id = cell.snapshot().run_id;
        let span = obs::run_span(&run_id);
        self.run_inner(run_id, request, request_digest, cell, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        request: &ValidationRequest,
        request_digest: ContentDigest,
        cell: &RunCell,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        let recorder = RunRecorder::new(Arc::clone(&self.store), run_id.clone(), request_digest);
        let scope = RunScope {
            run_id: run_id.clone(),
            request,
            cell,
            cancel,
            ledger: BudgetLedger::new(),
            progress: ProgressReporter::new(Arc::clone(&self.broadcaster), recorder.clone()),
            recorder,
            started_at: Utc::now(),
        };

        METRICS.inc_runs_started();
        obs::emit_run_started(
            &run_id,
            request.objectives.len(),
            request.context.documents.len(),
        );
        let snapshot = cell.update(|run| {
            run.status = RunStatus::Running;
            run.started_at = Some(scope.started_at);
            run.clone()
        });
        scope.recorder.create_run(&snapshot).await;
        for stage in &snapshot.stages {
            scope.recorder.update_stage(stage, None).await;
        }
        scope
            .progress
            .emit(EventScope::System, EventStatus::Running, 0, "run started", None)
            .await;

        let heartbeat = CancellationToken::new();
        let _stop_heartbeat = heartbeat.clone().drop_guard();
        self.broadcaster.spawn_heartbeat(
            run_id.clone(),
            self.config().heartbeat_interval(),
            heartbeat,
        );

        let skeptic = self.advance(StageKind::Skeptic, &scope, &[]).await?;
        let validator = self
            .advance(StageKind::Validator, &scope, std::slice::from_ref(&skeptic))
            .await?;
        let priors = [skeptic, validator];
        let synthesis = self.advance(StageKind::Synthesis, &scope, &priors).await?;

        Ok(self.completed(&scope, &priors, synthesis).await)
    }

    /// Run `stage` to completion, or take the run to its terminal state.
    async fn advance(
        &self,
        stage: StageKind,
        scope: &RunScope<'_>,
        prior: &[StageResult],
    ) -> Result<StageResult> {
        if scope.cancel.is_cancelled() {
            return Err(self.cancelled(scope).await);
        }
        match self.run_stage(stage, scope, prior).await {
            Ok(result) => {
                self.stage_completed(scope, &result).await;
                Ok(result)
            }
            Err(Interrupt::Cancelled) => Err(self.cancelled(scope).await),
            Err(Interrupt::Failed { error, attempts }) => {
                Err(self.failed(scope, stage, error, attempts).await)
            }
        }
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        scope: &RunScope<'_>,
        prior: &[StageResult],
    ) -> std::result::Result<StageResult, Interrupt> {
        let execution = scope.cell.update(|run| {
            let execution = run.stage_mut(stage);
            execution.status = StageStatus::Processing;
            execution.started_at = Some(Utc::now());
            execution.clone()
        });
        scope.recorder.update_stage(&execution, None).await;

        let max_retries = self.config().max_retries;
        let mut attempt = 1;
        let mut retries = 0;
        let mut compact = false;
        loop {
            let ctx = StageContext {
                run_id: &scope.run_id,
                request: scope.request,
                prior,
                ledger: &scope.ledger,
                progress: &scope.progress,
                attempt,
                compact,
            };
            let error = match self.executor.execute(stage, &ctx).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            let delay = if error.is_budget_exceeded() && !compact {
                compact = true;
                std::time::Duration::ZERO
            } else if error.is_retryable() && retries < max_retries {
                retries += 1;
                self.config().backoff(retries)
            } else {
                return Err(Interrupt::Failed {
                    error,
                    attempts: attempt,
                });
            };

            obs::emit_stage_retrying(
                &scope.run_id,
                stage,
                attempt,
                delay.as_millis() as u64,
                &error,
            );
            METRICS.inc_stage_retries();
            scope.cell.update(|run| {
                let execution = run.stage_mut(stage);
                execution.retry_count = attempt;
                execution.error = Some(error.to_string());
            });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if scope.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            attempt += 1;
        }
    }

    async fn stage_completed(&self, scope: &RunScope<'_>, result: &StageResult) {
        let stage = result.stage;
        let consumed = scope.ledger.consumed(stage);
        let tokens_used = scope.ledger.consumed_total();
        let (execution, snapshot) = scope.cell.update(|run| {
            let execution = run.stage_mut(stage);
            execution.status = StageStatus::Completed;
            execution.consumed_tokens = consumed;
            execution.findings = result.findings.clone();
            execution.confidence = Some(result.confidence);
            execution.quality = Some(result.quality.clone());
            execution.retry_count = result.attempts.saturating_sub(1);
            execution.error = None;
            execution.finished_at = Some(Utc::now());
            let execution = execution.clone();
            run.tokens_used = tokens_used;
            (execution, run.clone())
        });
        scope
            .recorder
            .update_stage(&execution, Some(&result.summary))
            .await;
        scope.recorder.append_findings(stage, &result.findings).await;
        scope.recorder.record_quality(stage.name(), &result.quality).await;
        scope.recorder.update_run(&snapshot).await;
        scope
            .progress
            .emit(
                EventScope::from(stage),
                EventStatus::Completed,
                stage.progress_at(1.0),
                format!("{stage}: completed with {} findings", result.findings.len()),
                Some(QualityMetrics {
                    score: result.quality.aggregate,
                    standard_met: result.quality.standard_met,
                    tokens_used,
                }),
            )
            .await;
    }

    async fn failed(
        &self,
        scope: &RunScope<'_>,
        stage: StageKind,
        error: StageError,
        attempts: u32,
    ) -> TribunalError {
        let tokens_consumed = scope.ledger.consumed_total();
        let stage_consumed = scope.ledger.consumed(stage);
        let retry_safe = !error.is_contract_violation();
        let failure = RunFailure {
            stage: Some(stage),
            reason: error.to_string(),
            tokens_consumed,
            retry_safe,
        };
        let (execution, snapshot) = scope.cell.update(|run| {
            let now = Utc::now();
            let execution = run.stage_mut(stage);
            execution.status = StageStatus::Failed;
            execution.consumed_tokens = stage_consumed;
            execution.retry_count = attempts.saturating_sub(1);
            execution.error = Some(error.to_string());
            execution.finished_at = Some(now);
            let execution = execution.clone();
            run.status = RunStatus::Failed;
            run.tokens_used = tokens_consumed;
            run.failure = Some(failure);
            run.finished_at = Some(now);
            (execution, run.clone())
        });
        scope.recorder.update_stage(&execution, None).await;
        scope.recorder.update_run(&snapshot).await;

        obs::emit_stage_finished(&scope.run_id, stage, false, stage_consumed, 0);
        let at = scope.progress.progress();
        scope
            .progress
            .emit(
                EventScope::from(stage),
                EventStatus::Failed,
                at,
                format!("{stage}: {error}"),
                None,
            )
            .await;
        scope
            .progress
            .emit(
                EventScope::System,
                EventStatus::Failed,
                at,
                format!("run failed in {stage}"),
                None,
            )
            .await;

        METRICS.inc_runs_failed();
        obs::emit_run_finished(&scope.run_id, "failed", scope.duration_ms(), tokens_consumed);
        METRICS.flush();

        TribunalError::RunFatal {
            run_id: scope.run_id.clone(),
            stage,
            tokens_consumed,
            retry_safe,
            source: error,
        }
    }

    async fn cancelled(&self, scope: &RunScope<'_>) -> TribunalError {
        let tokens_consumed = scope.ledger.consumed_total();
        let snapshot = scope.cell.update(|run| {
            let now = Utc::now();
            // Interrupted between attempts: the stage neither completed nor failed.
            for execution in run.stages.iter_mut() {
                if execution.status == StageStatus::Processing {
                    execution.status = StageStatus::Pending;
                }
            }
            run.status = RunStatus::Cancelled;
            run.tokens_used = tokens_consumed;
            run.finished_at = Some(now);
            run.clone()
        });
        scope.recorder.update_run(&snapshot).await;
        scope
            .progress
            .emit(
                EventScope::System,
                EventStatus::Cancelled,
                scope.progress.progress(),
                "run cancelled",
                None,
            )
            .await;

        METRICS.inc_runs_cancelled();
        obs::emit_run_finished(&scope.run_id, "cancelled", scope.duration_ms(), tokens_consumed);
        METRICS.flush();

        TribunalError::Cancelled {
            run_id: scope.run_id.clone(),
            tokens_consumed,
        }
    }

    async fn completed(
        &self,
        scope: &RunScope<'_>,
        priors: &[StageResult],
        synthesis: StageResult,
    ) -> ValidationReport {
        let quality = self.executor.scorer().score_synthesis(&synthesis, priors);
        obs::emit_quality_assessed(&scope.run_id, "run", quality.aggregate, quality.standard_met);
        scope.recorder.record_quality("run", &quality).await;

        let verdict = synthesis.verdict.as_ref();
        let recommendation = verdict.map_or(Recommendation::ProceedWithConditions, |v| {
            v.recommendation
        });
        let budget = scope.ledger.snapshot();
        let report = ValidationReport {
            run_id: scope.run_id.clone(),
            recommendation,
            overall_confidence: verdict.map_or(synthesis.confidence, |v| v.overall_confidence),
            executive_summary: verdict
                .map_or_else(|| synthesis.summary.clone(), |v| v.executive_summary.clone()),
            standard_met: quality.standard_met,
            stages: priors
                .iter()
                .chain(Some(&synthesis))
                .map(StageSummary::from_result)
                .collect(),
            findings: priors
                .iter()
                .chain(Some(&synthesis))
                .flat_map(|r| r.findings.iter().map(move |f| (r.stage, f.clone())))
                .collect(),
            quality,
            budget,
            started_at: scope.started_at,
            finished_at: Utc::now(),
        };

        let snapshot = scope.cell.update(|run| {
            run.status = RunStatus::Completed;
            run.quality_score = Some(report.quality.aggregate);
            run.standard_met = Some(report.standard_met);
            run.recommendation = Some(report.recommendation);
            run.tokens_used = report.budget.consumed;
            run.finished_at = Some(report.finished_at);
            run.clone()
        });
        scope.recorder.update_run(&snapshot).await;

        let task = if report.standard_met {
            format!("run completed: {}", report.recommendation)
        } else {
            format!(
                "run completed below the quality standard: {}",
                report.recommendation
            )
        };
        scope
            .progress
            .emit(
                EventScope::System,
                EventStatus::Completed,
                100,
                task,
                Some(QualityMetrics {
                    score: report.quality.aggregate,
                    standard_met: report.standard_met,
                    tokens_used: report.budget.consumed,
                }),
            )
            .await;

        METRICS.inc_runs_completed();
        obs::emit_run_finished(
            &scope.run_id,
            "completed",
            scope.duration_ms(),
            report.budget.consumed,
        );
        METRICS.flush();
        report
    }
}
