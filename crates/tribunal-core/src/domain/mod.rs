//! Domain types shared by every pipeline component.

pub mod error;
pub mod event;
pub mod finding;
pub mod quality;
pub mod report;
pub mod request;
pub mod run;

pub use error::{BudgetError, BudgetLimit, Result, StageError, TribunalError};
pub use event::{EventKind, EventScope, EventStatus, QualityMetrics, StatusEvent};
pub use finding::{Category, Finding, Severity};
pub use quality::QualityAssessment;
pub use report::{
    Recommendation, StageResult, StageSummary, SynthesisVerdict, TokenUsage, ValidationReport,
};
pub use request::{AnalysisContext, DocumentSummary, ValidationRequest};
pub use run::{Run, RunFailure, RunSnapshot, RunStatus, StageExecution, StageKind, StageStatus};
