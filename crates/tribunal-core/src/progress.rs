//! Per-run status emission.
//!
//! The pipeline is the only writer for its run, so events are numbered and
//! published in call order. Progress never moves backwards: a stage retry
//! re-reports the furthest point reached rather than rewinding.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tribunal_state::RunId;

use crate::broadcast::Broadcaster;
use crate::domain::event::{EventKind, EventScope, EventStatus, QualityMetrics, StatusEvent};
use crate::recording::RunRecorder;

pub struct ProgressReporter {
    run_id: RunId,
    broadcaster: Arc<Broadcaster>,
    recorder: RunRecorder,
    seq: AtomicU64,
    high_water: AtomicU8,
}

impl ProgressReporter {
    pub fn new(broadcaster: Arc<Broadcaster>, recorder: RunRecorder) -> Self {
        Self {
            run_id: recorder.run_id().clone(),
            broadcaster,
            recorder,
            seq: AtomicU64::new(0),
            high_water: AtomicU8::new(0),
        }
    }

    /// Furthest progress reported so far.
    pub fn progress(&self) -> u8 {
        self.high_water.load(Ordering::Acquire)
    }

    /// Publish one event, then persist it.
    ///
    /// Publishing happens before the first `.await`, so subscribers see events
    /// in emission order regardless of how long the store takes.
    pub async fn emit(
        &self,
        scope: EventScope,
        status: EventStatus,
        progress: u8,
        current_task: impl Into<String>,
        quality: Option<QualityMetrics>,
    ) -> StatusEvent {
        let progress = progress.min(100);
        let previous = self.high_water.fetch_max(progress, Ordering::AcqRel);
        let event = StatusEvent {
            run_id: self.run_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::AcqRel) + 1,
            scope,
            status,
            kind: EventKind::Transition,
            progress: progress.max(previous),
            current_task: current_task.into(),
            quality,
            timestamp: Utc::now(),
        };
        self.broadcaster.publish(event.clone());
        self.recorder.record_event(&event).await;
        event
    }
}
