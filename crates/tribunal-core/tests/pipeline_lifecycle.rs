//! End-to-end run lifecycle through the validation service.
//!
//! Covers stage sequencing, context handoff between stages, retry policy,
//! the no-silent-skip rule, cancellation, below-standard completion and
//! persistence outages.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tribunal_core::{
    EventScope, EventStatus, Recommendation, RunOutcome, RunStatus, StageError, StageKind,
    StageStatus, TribunalError,
};
use tribunal_llm::{GenerationError, ScriptedGenerator};
use tribunal_state::{AnalysisStore, MemoryAnalysisStore, RecordStatus, RunId};

#[tokio::test]
async fn test_full_run_completes_in_stage_order() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let svc = service(generator.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let events = collect(svc.subscribe(&run_id).unwrap());
    let report = svc.wait(&run_id).await.unwrap();
    let events = events.await;

    assert_eq!(report.recommendation, Recommendation::ProceedWithConditions);
    assert!((report.overall_confidence - 0.72).abs() < 1e-9);
    assert_eq!(report.standard_met, report.quality.aggregate >= 0.85);
    let order: Vec<StageKind> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(order, StageKind::ALL.to_vec());
    assert_eq!(report.budget.consumed, 4_500 + 5_500 + 3_300);

    let run = svc.run_status(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.stages.iter().all(|s| s.status == StageStatus::Completed));
    assert_eq!(run.tokens_used, report.budget.consumed);
    assert_eq!(run.recommendation, Some(Recommendation::ProceedWithConditions));

    // Stage n+1 starts only after stage n completed.
    let completed_at = |scope: EventScope| {
        events
            .iter()
            .position(|e| e.scope == scope && e.status == EventStatus::Completed)
            .unwrap()
    };
    let first_seen = |scope: EventScope| events.iter().position(|e| e.scope == scope).unwrap();
    assert!(completed_at(EventScope::Skeptic) < first_seen(EventScope::Validator));
    assert!(completed_at(EventScope::Validator) < first_seen(EventScope::Synthesis));

    let last = events.last().unwrap();
    assert_eq!((last.scope, last.status, last.progress), (EventScope::System, EventStatus::Completed, 100));
    assert!(last.quality.is_some());
}

#[tokio::test]
async fn test_stage_completed_event_is_visible_in_run_status() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let svc = service(generator, fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let mut subscription = svc.subscribe(&run_id).unwrap();
    let mut stages_seen = Vec::new();
    while let Some(event) = subscription.next().await {
        let Some(stage) = event.scope.stage() else {
            continue;
        };
        if event.status == EventStatus::Completed {
            let run = svc.run_status(&run_id).await.unwrap();
            assert_eq!(run.stage(stage).status, StageStatus::Completed);
            assert!(run.stage(stage).quality.is_some());
            stages_seen.push(stage);
        }
    }
    assert_eq!(stages_seen, StageKind::ALL.to_vec());
}

#[tokio::test]
async fn test_later_stages_receive_prior_findings() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let svc = service(generator.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    svc.wait(&run_id).await.unwrap();

    let requests = generator.requests();
    assert_eq!(requests.len(), 3);
    let validator_prompt = &requests[1].messages[0].content;
    assert!(validator_prompt.contains("Customer concentration"));
    assert!(validator_prompt.contains("Integration cost overrun"));
    assert!(validator_prompt.contains("Pricing pressure"));
    assert!(validator_prompt.contains("Validate each skeptic finding"));

    let synthesis_prompt = &requests[2].messages[0].content;
    assert!(synthesis_prompt.contains("# Skeptic findings"));
    assert!(synthesis_prompt.contains("# Validator findings"));
    assert!(synthesis_prompt.contains("Pricing pressure unsupported"));
}

#[tokio::test]
async fn test_fatal_skeptic_failure_leaves_later_stages_pending() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push_error(GenerationError::Http {
        status: 400,
        message: "prompt rejected".into(),
    });
    let svc = service(generator.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let err = svc.wait(&run_id).await.unwrap_err();

    match err {
        TribunalError::RunFatal {
            stage,
            tokens_consumed,
            retry_safe,
            ..
        } => {
            assert_eq!(stage, StageKind::Skeptic);
            assert_eq!(tokens_consumed, 0);
            assert!(retry_safe);
        }
        other => panic!("expected RunFatal, got {other:?}"),
    }
    assert_eq!(generator.call_count(), 1);

    let run = svc.run_status(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.stage(StageKind::Skeptic).status, StageStatus::Failed);
    assert_eq!(run.stage(StageKind::Validator).status, StageStatus::Pending);
    assert_eq!(run.stage(StageKind::Synthesis).status, StageStatus::Pending);
    let failure = run.failure.unwrap();
    assert_eq!(failure.stage, Some(StageKind::Skeptic));
    assert!(failure.reason.contains("HTTP 400"));
}

#[tokio::test]
async fn test_transient_errors_retry_until_exhausted() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push_text(SKEPTIC_RESPONSE, 3_000, 1_500);
    for _ in 0..3 {
        generator.push_error(GenerationError::Network {
            message: "connection reset".into(),
        });
    }
    let svc = service(generator.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let err = svc.wait(&run_id).await.unwrap_err();

    assert!(matches!(
        err,
        TribunalError::RunFatal {
            stage: StageKind::Validator,
            tokens_consumed: 4_500,
            source: StageError::Generation { .. },
            ..
        }
    ));
    // One skeptic call, then the first validator attempt plus two retries.
    assert_eq!(generator.call_count(), 4);

    let run = svc.run_status(&run_id).await.unwrap();
    assert_eq!(run.stage(StageKind::Skeptic).status, StageStatus::Completed);
    assert_eq!(run.stage(StageKind::Validator).status, StageStatus::Failed);
    assert_eq!(run.stage(StageKind::Validator).retry_count, 2);
    assert_eq!(run.stage(StageKind::Synthesis).status, StageStatus::Pending);
    assert_eq!(run.tokens_used, 4_500);
}

#[tokio::test]
async fn test_retry_recovers_from_single_timeout() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push_error(GenerationError::Timeout { secs: 30 });
    script_success(&generator);
    let svc = service(generator.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(generator.call_count(), 4);
    assert_eq!(report.stages[0].retry_count, 1);
    let run = svc.run_status(&run_id).await.unwrap();
    assert_eq!(run.stage(StageKind::Skeptic).retry_count, 1);
    assert!(run.stage(StageKind::Skeptic).error.is_none());
}

#[tokio::test]
async fn test_below_standard_run_still_completes() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push_text(SKEPTIC_RESPONSE, 3_000, 1_500);
    generator.push_text(VALIDATOR_RESPONSE, 4_000, 1_500);
    generator.push_text(THIN_SYNTHESIS_RESPONSE, 2_500, 10);
    let svc = service(generator, fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert!(!report.standard_met);
    assert!(report.quality.aggregate < 0.85);
    assert!(!report.quality.rationale.is_empty());

    let run = svc.run_status(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.standard_met, Some(false));
    assert!(run.failure.is_none());
    let terminal = svc.last_event(&run_id).unwrap();
    assert_eq!(terminal.status, EventStatus::Completed);
    assert_eq!(terminal.quality.map(|q| q.standard_met), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_takes_effect_at_stage_boundary() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push_delayed_text(Duration::from_secs(20), SKEPTIC_RESPONSE, 3_000, 1_500);
    generator.push_text(VALIDATOR_RESPONSE, 4_000, 1_500);
    let svc = service(generator.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let mut sub = svc.subscribe(&run_id).unwrap();
    while let Some(event) = sub.next().await {
        if event.current_task.contains("calling model") {
            break;
        }
    }
    svc.cancel_run(&run_id).unwrap();

    let err = svc.wait(&run_id).await.unwrap_err();
    assert!(matches!(
        err,
        TribunalError::Cancelled {
            tokens_consumed: 4_500,
            ..
        }
    ));
    // The in-flight skeptic call ran to completion; validator never started.
    assert_eq!(generator.call_count(), 1);

    let run = svc.run_status(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.stage(StageKind::Skeptic).status, StageStatus::Completed);
    assert_eq!(run.stage(StageKind::Validator).status, StageStatus::Pending);
    assert!(matches!(svc.outcome(&run_id), Some(RunOutcome::Cancelled { .. })));
}

#[tokio::test]
async fn test_store_outage_does_not_abort_run() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let svc = service_with(generator, Arc::new(UnavailableStore), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    assert_eq!(report.stages.len(), 3);
    assert_eq!(svc.run_status(&run_id).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_run_is_persisted_with_events_in_order() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let store = Arc::new(MemoryAnalysisStore::new());
    let svc = service_with(generator, store.clone(), fast_config());

    let run_id = svc.start_run(request()).unwrap();
    let report = svc.wait(&run_id).await.unwrap();

    let record = store.get_run(&run_id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.tokens_used, report.budget.consumed);
    assert_eq!(record.recommendation.as_deref(), Some("proceed_with_conditions"));
    assert_eq!(record.request_digest, request().digest().unwrap());

    let stages = store.get_stage_executions(&run_id).await.unwrap();
    assert_eq!(stages.len(), 3);
    assert!(stages.iter().all(|s| s.status == RecordStatus::Completed));

    let findings = store.get_findings(&run_id).await.unwrap();
    assert_eq!(findings.len(), report.findings.len());

    let scopes: Vec<String> = store
        .get_quality_assessments(&run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.scope)
        .collect();
    for scope in ["skeptic", "validator", "synthesis", "run"] {
        assert!(scopes.iter().any(|s| s == scope), "missing {scope} assessment");
    }

    let events = store.get_status_events(&run_id).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert_eq!(events.last().unwrap().status, "completed");
}

#[tokio::test]
async fn test_identical_request_reuses_run() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let svc = service(generator.clone(), fast_config());

    let first = svc.start_run(request()).unwrap();
    let second = svc.start_run(request()).unwrap();
    assert_eq!(first, second);

    svc.wait(&first).await.unwrap();
    let third = svc.start_run(request()).unwrap();
    assert_eq!(first, third);
    assert_eq!(generator.call_count(), 3);
}

#[tokio::test]
async fn test_failed_request_can_be_resubmitted() {
    let generator = Arc::new(ScriptedGenerator::new());
    generator.push_error(GenerationError::Parse {
        message: "bad body".into(),
    });
    script_success(&generator);
    let svc = service(generator, fast_config());

    let first = svc.start_run(request()).unwrap();
    assert!(svc.wait(&first).await.is_err());

    let second = svc.start_run(request()).unwrap();
    assert_ne!(first, second);
    assert!(svc.wait(&second).await.is_ok());
}

#[tokio::test]
async fn test_invalid_and_unknown_runs_are_rejected() {
    let svc = service(Arc::new(ScriptedGenerator::new()), fast_config());

    let mut bad = request();
    bad.objectives = vec![" ".into()];
    assert!(matches!(svc.start_run(bad), Err(TribunalError::InvalidRequest(_))));

    let unknown = RunId::from("no-such-run");
    assert!(matches!(svc.run_status(&unknown).await, Err(TribunalError::RunNotFound(_))));
    assert!(matches!(svc.cancel_run(&unknown), Err(TribunalError::RunNotFound(_))));
    assert!(svc.subscribe(&unknown).is_err());
    assert!(svc.last_event(&unknown).is_none());
}

#[tokio::test]
async fn test_shutdown_settles_live_runs() {
    let generator = Arc::new(ScriptedGenerator::new());
    script_success(&generator);
    let svc = service(generator, fast_config());
    let run_id = svc.start_run(request()).unwrap();

    svc.shutdown().await;

    let status = svc.run_status(&run_id).await.unwrap().status;
    assert!(status.is_terminal());
    assert!(svc.subscribe(&run_id).is_err());
}
