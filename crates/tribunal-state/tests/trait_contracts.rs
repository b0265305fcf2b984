//! Trait contract tests for AnalysisStore.
//!
//! Every conforming implementation must pass these. They run against the
//! in-memory fake and the in-memory SurrealDB backend.

use chrono::Utc;
use serde_json::json;
use tribunal_state::storage_traits::*;
use tribunal_state::{MemoryAnalysisStore, StorageError, SurrealAnalysisStore};

fn run_record(run_id: &RunId) -> RunRecord {
    RunRecord {
        run_id: run_id.clone(),
        request_digest: ContentDigest::from_bytes(b"request"),
        status: RecordStatus::Pending,
        total_budget: 80_000,
        tokens_used: 0,
        quality_score: None,
        standard_met: None,
        recommendation: None,
        failure: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

fn stage_record(run_id: &RunId, stage: &str, order: u8) -> StageExecutionRecord {
    StageExecutionRecord {
        run_id: run_id.clone(),
        stage: stage.to_string(),
        execution_order: order,
        status: RecordStatus::Pending,
        allocated_tokens: 35_000,
        consumed_tokens: 0,
        retry_count: 0,
        confidence: None,
        quality_score: None,
        summary: None,
        error: None,
        updated_at: Utc::now(),
    }
}

fn finding_record(run_id: &RunId, stage: &str, order: u8, seq: u32) -> FindingRecord {
    let payload = json!({"title": format!("finding {seq}")});
    FindingRecord {
        run_id: run_id.clone(),
        stage: stage.to_string(),
        execution_order: order,
        seq,
        title: format!("finding {seq}"),
        severity: "high".to_string(),
        category: "financial".to_string(),
        confidence: 0.7,
        digest: ContentDigest::from_bytes(payload.to_string().as_bytes()),
        payload,
    }
}

fn event_record(run_id: &RunId, seq: u64, progress: u8) -> StatusEventRecord {
    StatusEventRecord {
        run_id: run_id.clone(),
        seq,
        stage: "system".to_string(),
        status: "running".to_string(),
        progress,
        payload: json!({"current_task": "test"}),
        timestamp: Utc::now(),
    }
}

async fn create_is_idempotent(store: &dyn AnalysisStore) {
    let run_id = RunId::new();
    store.create_run(run_record(&run_id)).await.unwrap();

    let mut updated = run_record(&run_id);
    updated.status = RecordStatus::Running;
    store.update_run(updated).await.unwrap();

    // Replaying create must not reset the row.
    store.create_run(run_record(&run_id)).await.unwrap();
    let fetched = store.get_run(&run_id).await.unwrap();
    assert_eq!(fetched.status, RecordStatus::Running);
}

async fn writes_to_unknown_run_fail(store: &dyn AnalysisStore) {
    let run_id = RunId::new();
    let err = store
        .update_stage_execution(stage_record(&run_id, "skeptic", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RunNotFound { .. }));

    let err = store.get_run(&run_id).await.unwrap_err();
    assert!(matches!(err, StorageError::RunNotFound { .. }));
}

async fn stage_upsert_keeps_one_row_per_stage(store: &dyn AnalysisStore) {
    let run_id = RunId::new();
    store.create_run(run_record(&run_id)).await.unwrap();

    store
        .update_stage_execution(stage_record(&run_id, "validator", 2))
        .await
        .unwrap();
    store
        .update_stage_execution(stage_record(&run_id, "skeptic", 1))
        .await
        .unwrap();

    let mut processing = stage_record(&run_id, "skeptic", 1);
    processing.status = RecordStatus::Completed;
    processing.consumed_tokens = 30_000;
    store.update_stage_execution(processing).await.unwrap();

    let stages = store.get_stage_executions(&run_id).await.unwrap();
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[0].stage, "skeptic");
    assert_eq!(stages[0].status, RecordStatus::Completed);
    assert_eq!(stages[0].consumed_tokens, 30_000);
    assert_eq!(stages[1].stage, "validator");
}

async fn finding_replay_does_not_duplicate(store: &dyn AnalysisStore) {
    let run_id = RunId::new();
    store.create_run(run_record(&run_id)).await.unwrap();

    store
        .append_finding(finding_record(&run_id, "validator", 2, 0))
        .await
        .unwrap();
    store
        .append_finding(finding_record(&run_id, "skeptic", 1, 1))
        .await
        .unwrap();
    store
        .append_finding(finding_record(&run_id, "skeptic", 1, 0))
        .await
        .unwrap();
    store
        .append_finding(finding_record(&run_id, "skeptic", 1, 0))
        .await
        .unwrap();

    let findings = store.get_findings(&run_id).await.unwrap();
    assert_eq!(findings.len(), 3);
    let order: Vec<(u8, u32)> = findings
        .iter()
        .map(|f| (f.execution_order, f.seq))
        .collect();
    assert_eq!(order, vec![(1, 0), (1, 1), (2, 0)]);
}

async fn status_events_ordered_by_seq(store: &dyn AnalysisStore) {
    let run_id = RunId::new();
    store.create_run(run_record(&run_id)).await.unwrap();

    for (seq, progress) in [(3u64, 40u8), (1, 0), (2, 10), (2, 10)] {
        store
            .record_status_event(event_record(&run_id, seq, progress))
            .await
            .unwrap();
    }

    let events = store.get_status_events(&run_id).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

async fn quality_keyed_by_scope(store: &dyn AnalysisStore) {
    let run_id = RunId::new();
    store.create_run(run_record(&run_id)).await.unwrap();

    for (scope, aggregate) in [("skeptic", 0.7), ("run", 0.9), ("run", 0.91)] {
        store
            .record_quality_assessment(QualityRecord {
                run_id: run_id.clone(),
                scope: scope.to_string(),
                aggregate,
                standard_met: aggregate >= 0.85,
                payload: json!({}),
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let quality = store.get_quality_assessments(&run_id).await.unwrap();
    assert_eq!(quality.len(), 2);
    let run_scope = quality.iter().find(|q| q.scope == "run").unwrap();
    assert!((run_scope.aggregate - 0.91).abs() < 1e-9);
}

async fn run_all(store: &dyn AnalysisStore) {
    create_is_idempotent(store).await;
    writes_to_unknown_run_fail(store).await;
    stage_upsert_keeps_one_row_per_stage(store).await;
    finding_replay_does_not_duplicate(store).await;
    status_events_ordered_by_seq(store).await;
    quality_keyed_by_scope(store).await;
}

#[tokio::test]
async fn memory_store_satisfies_contract() {
    let store = MemoryAnalysisStore::new();
    run_all(&store).await;
}

#[tokio::test]
async fn surreal_store_satisfies_contract() {
    let store = SurrealAnalysisStore::in_memory().await.unwrap();
    run_all(&store).await;
}

#[tokio::test]
async fn surreal_store_persists_to_surrealkv() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("surrealkv://{}", dir.path().join("db").display());
    let store = SurrealAnalysisStore::connect(&url).await.unwrap();

    let run_id = RunId::new();
    store.create_run(run_record(&run_id)).await.unwrap();
    assert_eq!(store.get_run(&run_id).await.unwrap().total_budget, 80_000);
}

#[tokio::test]
async fn schema_init_accepts_permission_clauses_and_is_repeatable() {
    let db = surrealdb::engine::any::connect("mem://").await.unwrap();
    db.use_ns("tribunal").use_db("main").await.unwrap();

    tribunal_state::migrations::init_schema(&db).await.unwrap();
    tribunal_state::migrations::init_schema(&db).await.unwrap();
}
