//! Two runs sharing one service must not share budgets or event streams.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use tribunal_core::{
    EventStatus, FindingExtractor, RunId, RunStatus, StatusEvent, ValidationRequest,
    ValidationService,
};
use tribunal_llm::{GenerationRequest, GenerationResponse, GenerationResult, TextGenerator};
use tribunal_state::MemoryAnalysisStore;

/// Answers each stage with its canned response. Requests about Globex are
/// charged double so the two runs' ledgers can be told apart.
struct StageRouter;

#[async_trait]
impl TextGenerator for StageRouter {
    fn name(&self) -> &str {
        "stage-router"
    }

    async fn generate(&self, request: GenerationRequest) -> GenerationResult<GenerationResponse> {
        // Let the other run make progress between calls.
        tokio::task::yield_now().await;
        let scale = if request.messages.iter().any(|m| m.content.contains("Globex")) {
            2
        } else {
            1
        };
        let text = if request.system_prompt.contains("You are the skeptic") {
            SKEPTIC_RESPONSE
        } else if request.system_prompt.contains("You are the validator") {
            VALIDATOR_RESPONSE
        } else {
            SYNTHESIS_RESPONSE
        };
        Ok(GenerationResponse {
            text: text.to_string(),
            input_tokens: 1_000 * scale,
            output_tokens: 500 * scale,
            model: "stage-router".to_string(),
        })
    }
}

fn globex_request() -> ValidationRequest {
    let mut req = request();
    req.objectives = vec!["Assess the acquisition of Globex Logistics".to_string()];
    req
}

fn assert_own_ordered_stream(events: &[StatusEvent], run_id: &RunId) {
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| &e.run_id == run_id));
    let transitions: Vec<&StatusEvent> = events.iter().filter(|e| !e.is_heartbeat()).collect();
    for pair in transitions.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
    }
    for pair in events.windows(2) {
        assert!(pair[0].progress <= pair[1].progress);
    }
    let last = events.last().unwrap();
    assert!(last.is_terminal());
    assert_eq!(last.status, EventStatus::Completed);
}

#[tokio::test]
async fn test_concurrent_runs_keep_separate_budgets_and_streams() {
    let svc = ValidationService::new(
        Arc::new(StageRouter),
        Arc::new(MemoryAnalysisStore::new()),
        FindingExtractor::default(),
        fast_config(),
    );

    let acme = svc.start_run(request()).unwrap();
    let globex = svc.start_run(globex_request()).unwrap();
    assert_ne!(acme, globex);

    let acme_events = tokio::spawn(collect(svc.subscribe(&acme).unwrap()));
    let globex_events = tokio::spawn(collect(svc.subscribe(&globex).unwrap()));

    let (acme_report, globex_report) = tokio::join!(svc.wait(&acme), svc.wait(&globex));
    let (acme_report, globex_report) = (acme_report.unwrap(), globex_report.unwrap());

    let per_stage = |report: &tribunal_core::ValidationReport| -> Vec<u64> {
        report.budget.stages.iter().map(|s| s.consumed).collect()
    };
    assert_eq!(per_stage(&acme_report), vec![1_500, 1_500, 1_500]);
    assert_eq!(per_stage(&globex_report), vec![3_000, 3_000, 3_000]);
    assert_eq!(acme_report.budget.consumed, 4_500);
    assert_eq!(globex_report.budget.consumed, 9_000);
    assert_eq!(acme_report.budget.reserved, 0);
    assert_eq!(globex_report.budget.reserved, 0);

    assert_eq!(svc.run_status(&acme).await.unwrap().tokens_used, 4_500);
    assert_eq!(svc.run_status(&globex).await.unwrap().status, RunStatus::Completed);

    let acme_events = acme_events.await.unwrap();
    let globex_events = globex_events.await.unwrap();
    assert_own_ordered_stream(&acme_events, &acme);
    assert_own_ordered_stream(&globex_events, &globex);
}
