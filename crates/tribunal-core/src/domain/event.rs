//! Status events broadcast to run subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tribunal_state::RunId;

use crate::domain::run::StageKind;

/// What an event is about: the whole run, or one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    System,
    Skeptic,
    Validator,
    Synthesis,
}

impl EventScope {
    pub fn name(&self) -> &'static str {
        match self {
            EventScope::System => "system",
            EventScope::Skeptic => "skeptic",
            EventScope::Validator => "validator",
            EventScope::Synthesis => "synthesis",
        }
    }

    pub fn stage(&self) -> Option<StageKind> {
        match self {
            EventScope::System => None,
            EventScope::Skeptic => Some(StageKind::Skeptic),
            EventScope::Validator => Some(StageKind::Validator),
            EventScope::Synthesis => Some(StageKind::Synthesis),
        }
    }
}

impl From<StageKind> for EventScope {
    fn from(stage: StageKind) -> Self {
        match stage {
            StageKind::Skeptic => EventScope::Skeptic,
            StageKind::Validator => EventScope::Validator,
            StageKind::Synthesis => EventScope::Synthesis,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Running,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl EventStatus {
    pub fn name(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Running => "running",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Failed | EventStatus::Cancelled
        )
    }
}

/// A real state change, or a liveness re-broadcast of the last one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Transition,
    Heartbeat,
}

/// Quality metrics attached to completion events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub score: f64,
    pub standard_met: bool,
    pub tokens_used: u64,
}

/// One progress notification for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub run_id: RunId,
    /// Per-run sequence number; heartbeats repeat the last transition's.
    pub seq: u64,
    pub scope: EventScope,
    pub status: EventStatus,
    #[serde(default)]
    pub kind: EventKind,
    /// Run-level progress, 0-100, non-decreasing within a run.
    pub progress: u8,
    pub current_task: String,
    pub quality: Option<QualityMetrics>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// A run-scoped event in a terminal status ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.scope == EventScope::System && self.status.is_terminal()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == EventKind::Heartbeat
    }

    /// Re-broadcast of this event as a liveness signal.
    pub fn to_heartbeat(&self) -> StatusEvent {
        StatusEvent {
            kind: EventKind::Heartbeat,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}
