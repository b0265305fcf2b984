//! Structured observability hooks for the run lifecycle.
//!
//! Every function emits one event carrying an `event = "..."` field so logs
//! can be filtered by lifecycle step. Verbosity follows `TRIBUNAL_LOG` /
//! `RUST_LOG`; see [`crate::telemetry`].

use tracing::{info, warn};
use tribunal_state::RunId;

use crate::domain::run::StageKind;

/// Span that tags everything inside a run with its `run_id`.
///
/// Attach with `tracing::Instrument::instrument` so it survives `.await`.
pub fn run_span(run_id: &RunId) -> tracing::Span {
    tracing::info_span!("tribunal.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &RunId, objectives: usize, documents: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        objectives = objectives,
        documents = documents,
    );
}

pub fn emit_stage_started(run_id: &RunId, stage: StageKind, attempt: u32, compact: bool) {
    info!(
        event = "stage.started",
        run_id = %run_id,
        stage = %stage,
        attempt = attempt,
        compact = compact,
    );
}

/// Emit event: a stage attempt failed and will be retried.
pub fn emit_stage_retrying(
    run_id: &RunId,
    stage: StageKind,
    attempt: u32,
    delay_ms: u64,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "stage.retrying",
        run_id = %run_id,
        stage = %stage,
        attempt = attempt,
        delay_ms = delay_ms,
        error = %error,
    );
}

pub fn emit_stage_finished(
    run_id: &RunId,
    stage: StageKind,
    success: bool,
    tokens: u64,
    findings: usize,
) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        success = success,
        tokens = tokens,
        findings = findings,
    );
}

/// Emit event: the ledger denied a reservation. The model was not called.
pub fn emit_budget_rejected(run_id: &RunId, stage: StageKind, requested: u64, available: u64) {
    warn!(
        event = "budget.rejected",
        run_id = %run_id,
        stage = %stage,
        requested = requested,
        available = available,
    );
}

pub fn emit_extraction_degraded(run_id: &RunId, stage: StageKind, response_chars: usize) {
    warn!(
        event = "extraction.degraded",
        run_id = %run_id,
        stage = %stage,
        response_chars = response_chars,
    );
}

/// Emit event: a quality assessment was computed. `scope` is a stage name or `run`.
pub fn emit_quality_assessed(run_id: &RunId, scope: &str, aggregate: f64, standard_met: bool) {
    info!(
        event = "quality.assessed",
        run_id = %run_id,
        scope = %scope,
        aggregate = aggregate,
        standard_met = standard_met,
    );
}

pub fn emit_run_finished(run_id: &RunId, status: &str, duration_ms: u64, tokens_used: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
        tokens_used = tokens_used,
    );
}

/// Emit event: a persistence write failed. The run carries on.
pub fn emit_store_write_failed(run_id: &RunId, operation: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "store.write_failed",
        run_id = %run_id,
        operation = %operation,
        error = %error,
    );
}
