//! Stage results and the final validation report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tribunal_state::{ContentDigest, RunId};

use crate::budget::BudgetSnapshot;
use crate::domain::finding::{Finding, Severity};
use crate::domain::quality::QualityAssessment;
use crate::domain::run::{StageKind, StageStatus};

/// Token usage reported by the generation service for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Go / no-go verdict produced by synthesis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Proceed,
    ProceedWithConditions,
    DoNotProceed,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Proceed => "proceed",
            Recommendation::ProceedWithConditions => "proceed_with_conditions",
            Recommendation::DoNotProceed => "do_not_proceed",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed conclusion of the synthesis stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisVerdict {
    pub recommendation: Recommendation,
    /// Whether the recommendation was stated, rather than defaulted.
    pub explicit: bool,
    pub overall_confidence: f64,
    pub executive_summary: String,
}

/// Immutable output of one successful stage execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: StageKind,
    pub findings: Vec<Finding>,
    pub summary: String,
    pub confidence: f64,
    pub quality: QualityAssessment,
    pub usage: TokenUsage,
    /// Raw model output, kept for run-level grading and audit.
    pub response: String,
    pub response_digest: ContentDigest,
    /// Non-empty response that yielded no findings.
    pub extraction_degraded: bool,
    /// Present only for synthesis.
    pub verdict: Option<SynthesisVerdict>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

impl StageResult {
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity >= severity).count()
    }
}

/// Per-stage line of the final report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    pub stage: StageKind,
    pub status: StageStatus,
    pub findings: usize,
    pub critical_findings: usize,
    pub confidence: f64,
    pub quality_score: f64,
    pub standard_met: bool,
    pub tokens_consumed: u64,
    pub retry_count: u32,
    pub summary: String,
}

impl StageSummary {
    pub fn from_result(result: &StageResult) -> Self {
        Self {
            stage: result.stage,
            status: StageStatus::Completed,
            findings: result.findings.len(),
            critical_findings: result.count_at_least(Severity::Critical),
            confidence: result.confidence,
            quality_score: result.quality.aggregate,
            standard_met: result.quality.standard_met,
            tokens_consumed: result.usage.total(),
            retry_count: result.attempts.saturating_sub(1),
            summary: result.summary.clone(),
        }
    }
}

/// Outcome of a completed run.
///
/// `standard_met == false` means the run completed but the quality bar was
/// missed; it is reported, never treated as a failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub run_id: RunId,
    pub recommendation: Recommendation,
    pub overall_confidence: f64,
    pub executive_summary: String,
    pub quality: QualityAssessment,
    pub standard_met: bool,
    pub stages: Vec<StageSummary>,
    /// Every finding, in stage order.
    pub findings: Vec<(StageKind, Finding)>,
    pub budget: BudgetSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn tokens_used(&self) -> u64 {
        self.budget.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_wire_names() {
        assert_eq!(
            serde_json::to_string(&Recommendation::ProceedWithConditions).unwrap(),
            "\"proceed_with_conditions\""
        );
        assert_eq!(Recommendation::DoNotProceed.to_string(), "do_not_proceed");
    }

    #[test]
    fn usage_totals() {
        let usage = TokenUsage {
            input_tokens: 12_000,
            output_tokens: 3_500,
        };
        assert_eq!(usage.total(), 15_500);
    }
}
