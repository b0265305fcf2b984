//! Tribunal Core Library
//!
//! Adversarial three-stage analysis (skeptic, validator, synthesis) over a
//! text-generation service, under a fixed 80,000-token budget, graded
//! against an explainable quality rubric and streamed live to subscribers.

pub mod broadcast;
pub mod budget;
pub mod config;
pub mod domain;
pub mod executor;
pub mod extract;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod quality;
pub mod recording;
pub mod service;
pub mod telemetry;

pub use domain::{
    AnalysisContext, BudgetError, BudgetLimit, Category, DocumentSummary, EventKind, EventScope,
    EventStatus, Finding, QualityAssessment, QualityMetrics, Recommendation, Result, Run,
    RunFailure, RunSnapshot, RunStatus, Severity, StageError, StageExecution, StageKind,
    StageResult, StageStatus, StageSummary, StatusEvent, SynthesisVerdict, TokenUsage,
    TribunalError, ValidationReport, ValidationRequest,
};

pub use broadcast::{Broadcaster, Subscription};
pub use budget::{
    estimate_tokens, reservation_size, BudgetLedger, BudgetSnapshot, Reservation, StageBudget,
    SKEPTIC_ALLOCATION, SYNTHESIS_ALLOCATION, TOTAL_BUDGET, VALIDATOR_ALLOCATION,
};
pub use config::{PipelineConfig, StageSettings};
pub use executor::{StageContext, StageExecutor};
pub use extract::{Extraction, ExtractorConfig, FindingExtractor};
pub use metrics::METRICS;
pub use pipeline::{Pipeline, RunCell};
pub use progress::ProgressReporter;
pub use prompt::{build_prompt, StagePrompt};
pub use quality::{QualityScorer, QUALITY_THRESHOLD};
pub use recording::{load_run, RunRecorder};
pub use service::{RunOutcome, ValidationService};

pub use tribunal_state::{ContentDigest, RunId};
