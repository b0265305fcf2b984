//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryAnalysisStore`, which satisfies the `AnalysisStore`
//! contract without any external dependencies.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    stages: BTreeMap<(u8, String), StageExecutionRecord>,
    findings: BTreeMap<(u8, u32), FindingRecord>,
    quality: BTreeMap<String, QualityRecord>,
    events: BTreeMap<u64, StatusEventRecord>,
}

/// In-memory analysis store backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryAnalysisStore {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs currently held.
    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn with_run<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut RunState) -> T,
    ) -> StorageResult<T> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        Ok(f(state))
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn create_run(&self, record: RunRecord) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.entry(record.run_id.0.clone()).or_insert(RunState {
            record,
            stages: BTreeMap::new(),
            findings: BTreeMap::new(),
            quality: BTreeMap::new(),
            events: BTreeMap::new(),
        });
        Ok(())
    }

    async fn update_run(&self, record: RunRecord) -> StorageResult<()> {
        let run_id = record.run_id.clone();
        self.with_run(&run_id, |state| state.record = record)
    }

    async fn update_stage_execution(&self, record: StageExecutionRecord) -> StorageResult<()> {
        let run_id = record.run_id.clone();
        self.with_run(&run_id, |state| {
            state
                .stages
                .insert((record.execution_order, record.stage.clone()), record);
        })
    }

    async fn append_finding(&self, record: FindingRecord) -> StorageResult<()> {
        let run_id = record.run_id.clone();
        self.with_run(&run_id, |state| {
            state
                .findings
                .insert((record.execution_order, record.seq), record);
        })
    }

    async fn record_quality_assessment(&self, record: QualityRecord) -> StorageResult<()> {
        let run_id = record.run_id.clone();
        self.with_run(&run_id, |state| {
            state.quality.insert(record.scope.clone(), record);
        })
    }

    async fn record_status_event(&self, record: StatusEventRecord) -> StorageResult<()> {
        let run_id = record.run_id.clone();
        self.with_run(&run_id, |state| {
            state.events.insert(record.seq, record);
        })
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.with_run(run_id, |state| state.record.clone())
    }

    async fn get_stage_executions(
        &self,
        run_id: &RunId,
    ) -> StorageResult<Vec<StageExecutionRecord>> {
        self.with_run(run_id, |state| state.stages.values().cloned().collect())
    }

    async fn get_findings(&self, run_id: &RunId) -> StorageResult<Vec<FindingRecord>> {
        self.with_run(run_id, |state| state.findings.values().cloned().collect())
    }

    async fn get_quality_assessments(&self, run_id: &RunId) -> StorageResult<Vec<QualityRecord>> {
        self.with_run(run_id, |state| state.quality.values().cloned().collect())
    }

    async fn get_status_events(&self, run_id: &RunId) -> StorageResult<Vec<StatusEventRecord>> {
        self.with_run(run_id, |state| state.events.values().cloned().collect())
    }
}
