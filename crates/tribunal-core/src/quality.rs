//! Quality rubric
//!
//! Deterministic five-part grading of stage output. Same input, same score:
//! no randomness, no model calls.
//!
//! | sub-score            | weight |
//! |----------------------|--------|
//! | methodology          | 0.30   |
//! | internal consistency | 0.20   |
//! | evidence quality     | 0.20   |
//! | recommendation logic | 0.15   |
//! | deliverable quality  | 0.15   |
//!
//! A result meets the standard when the weighted aggregate is at least
//! [`QUALITY_THRESHOLD`].

use std::collections::HashSet;

use crate::domain::finding::{Category, Finding, Severity};
use crate::domain::quality::QualityAssessment;
use crate::domain::report::{Recommendation, StageResult};
use crate::domain::run::StageKind;
use crate::extract::text::{contains_term, count_terms};
use crate::extract::Extraction;

/// Aggregate score a result must reach to meet the standard.
pub const QUALITY_THRESHOLD: f64 = 0.85;

pub const WEIGHT_METHODOLOGY: f64 = 0.30;
pub const WEIGHT_CONSISTENCY: f64 = 0.20;
pub const WEIGHT_EVIDENCE: f64 = 0.20;
pub const WEIGHT_RECOMMENDATION: f64 = 0.15;
pub const WEIGHT_DELIVERABLE: f64 = 0.15;

const SKEPTIC_FRAMEWORKS: &[&str] = &[
    "pre-mortem",
    "devil's advocate",
    "red team*",
    "worst case",
    "failure mode*",
    "downside",
    "assumption*",
    "stress test*",
    "second-order",
    "base rate*",
];

const VALIDATOR_FRAMEWORKS: &[&str] = &[
    "evidence",
    "verif*",
    "corroborat*",
    "source*",
    "triangulat*",
    "cross-check*",
    "substantiat*",
    "confirm*",
    "citation*",
    "data",
];

const SYNTHESIS_FRAMEWORKS: &[&str] = &[
    "risk-adjusted",
    "weigh*",
    "trade-off*",
    "scenario*",
    "mitigat*",
    "condition*",
    "balance",
    "prioriti*",
    "recommend*",
    "go/no-go",
];

/// Descriptions shorter than this count as incomplete.
const MIN_DESCRIPTION_CHARS: usize = 40;

/// Executive summaries shorter than this earn partial deliverable credit.
const MIN_EXECUTIVE_SUMMARY_CHARS: usize = 80;

/// Gap allowed between mean severity weight and stated confidence.
const SEVERITY_CONFIDENCE_TOLERANCE: f64 = 0.2;

fn frameworks(stage: StageKind) -> &'static [&'static str] {
    match stage {
        StageKind::Skeptic => SKEPTIC_FRAMEWORKS,
        StageKind::Validator => VALIDATOR_FRAMEWORKS,
        StageKind::Synthesis => SYNTHESIS_FRAMEWORKS,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn duplicate_ratio(findings: &[Finding]) -> f64 {
    let unique: HashSet<String> = findings.iter().map(|f| f.title.to_lowercase()).collect();
    ratio(findings.len() - unique.len(), findings.len())
}

fn evidence_fraction<'a>(findings: impl Iterator<Item = &'a Finding>) -> Option<f64> {
    let (total, backed) = findings.fold((0usize, 0usize), |(t, b), f| {
        (t + 1, b + usize::from(f.has_evidence()))
    });
    (total > 0).then(|| ratio(backed, total))
}

fn complete_fraction(findings: &[Finding]) -> f64 {
    let complete = findings
        .iter()
        .filter(|f| f.is_well_formed() && f.description.chars().count() >= MIN_DESCRIPTION_CHARS)
        .count();
    ratio(complete, findings.len())
}

#[derive(Debug, Default)]
struct Grades {
    methodology: f64,
    consistency: f64,
    evidence: f64,
    recommendation: f64,
    deliverable: f64,
    rationale: Vec<String>,
}

impl Grades {
    fn assess(self) -> QualityAssessment {
        let methodology = round4(self.methodology.clamp(0.0, 1.0));
        let internal_consistency = round4(self.consistency.clamp(0.0, 1.0));
        let evidence_quality = round4(self.evidence.clamp(0.0, 1.0));
        let recommendation_logic = round4(self.recommendation.clamp(0.0, 1.0));
        let deliverable_quality = round4(self.deliverable.clamp(0.0, 1.0));
        let aggregate = round4(
            WEIGHT_METHODOLOGY * methodology
                + WEIGHT_CONSISTENCY * internal_consistency
                + WEIGHT_EVIDENCE * evidence_quality
                + WEIGHT_RECOMMENDATION * recommendation_logic
                + WEIGHT_DELIVERABLE * deliverable_quality,
        );
        QualityAssessment {
            methodology,
            internal_consistency,
            evidence_quality,
            recommendation_logic,
            deliverable_quality,
            aggregate,
            standard_met: aggregate >= QUALITY_THRESHOLD,
            rationale: self.rationale,
        }
    }
}

/// Grades stage results and whole runs against the rubric.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Grade one stage's extraction.
    pub fn score(&self, stage: StageKind, response: &str, extraction: &Extraction) -> QualityAssessment {
        let findings = &extraction.findings;
        let mut grades = Grades::default();

        let (methodology, hits, total) = methodology(stage, response);
        grades.methodology = methodology;
        grades
            .rationale
            .push(format!("methodology: {hits}/{total} {stage} frameworks referenced"));

        if findings.is_empty() {
            grades.consistency = 0.3;
            grades.evidence = 0.2;
            grades.recommendation = 0.3;
            grades.deliverable = 0.2;
            grades
                .rationale
                .push("no findings extracted; remaining sub-scores floored".to_string());
            return grades.assess();
        }

        // Consistency: duplicated titles and severe findings that nobody acts on.
        let duplicates = duplicate_ratio(findings);
        let incoherent = findings
            .iter()
            .filter(|f| {
                (f.severity == Severity::Critical && f.confidence < 0.3)
                    || (f.severity >= Severity::High && !f.action_required)
            })
            .count();
        grades.consistency = 1.0 - 0.5 * duplicates - 0.4 * ratio(incoherent, findings.len());
        if duplicates > 0.0 {
            grades
                .rationale
                .push(format!("consistency: {:.0}% duplicate titles", duplicates * 100.0));
        }
        if incoherent > 0 {
            grades.rationale.push(format!(
                "consistency: {incoherent} severe finding(s) without action or with low confidence"
            ));
        }

        let backed = evidence_fraction(findings.iter()).unwrap_or(0.0);
        grades.evidence = 0.3 + 0.7 * backed;
        grades.rationale.push(format!(
            "evidence: {:.0}% of findings cite a source",
            backed * 100.0
        ));

        let serious: Vec<&Finding> = findings.iter().filter(|f| f.severity >= Severity::High).collect();
        let action_coverage = if serious.is_empty() {
            1.0
        } else {
            ratio(serious.iter().filter(|f| f.action_required).count(), serious.len())
        };
        // Severe findings should be asserted with conviction and minor ones
        // without it. Mismatch beyond the tolerance costs alignment.
        let mean_weight =
            findings.iter().map(|f| f.severity.weight()).sum::<f64>() / findings.len() as f64;
        let mismatch = (mean_weight - extraction.confidence).abs();
        let alignment =
            (1.0 - (mismatch - SEVERITY_CONFIDENCE_TOLERANCE).max(0.0)).clamp(0.0, 1.0);
        grades.recommendation = 0.6 * action_coverage + 0.4 * alignment;
        if action_coverage < 1.0 {
            grades.rationale.push(format!(
                "recommendation: {:.0}% of high-severity findings carry an action",
                action_coverage * 100.0
            ));
        }
        if alignment < 1.0 {
            grades.rationale.push(format!(
                "recommendation: confidence {:.0}% does not fit severity weight {:.0}%",
                extraction.confidence * 100.0,
                mean_weight * 100.0
            ));
        }

        let complete = complete_fraction(findings);
        let categorized = ratio(
            findings
                .iter()
                .filter(|f| f.category != Category::General)
                .count(),
            findings.len(),
        );
        let has_summary = if extraction.summary.trim().is_empty() { 0.0 } else { 1.0 };
        grades.deliverable = 0.5 * complete + 0.3 * categorized + 0.2 * has_summary;
        grades.rationale.push(format!(
            "deliverable: {:.0}% complete, {:.0}% categorized",
            complete * 100.0,
            categorized * 100.0
        ));

        grades.assess()
    }

    /// Grade the run: synthesis judged against the stages it drew on.
    pub fn score_synthesis(&self, synthesis: &StageResult, priors: &[StageResult]) -> QualityAssessment {
        let mut grades = Grades::default();
        let response_lower = synthesis.response.to_ascii_lowercase();
        let recommendation = synthesis
            .verdict
            .as_ref()
            .map(|v| v.recommendation)
            .unwrap_or(Recommendation::ProceedWithConditions);
        let explicit = synthesis.verdict.as_ref().is_some_and(|v| v.explicit);
        let overall_confidence = synthesis
            .verdict
            .as_ref()
            .map_or(synthesis.confidence, |v| v.overall_confidence);
        let executive_summary = synthesis
            .verdict
            .as_ref()
            .map_or(synthesis.summary.as_str(), |v| v.executive_summary.as_str());

        let (methodology, hits, total) = methodology(StageKind::Synthesis, &synthesis.response);
        let all_priors = priors.len() >= 2;
        grades.methodology = methodology + if all_priors { 0.1 } else { 0.0 };
        grades
            .rationale
            .push(format!("methodology: {hits}/{total} synthesis frameworks referenced"));

        let prior_findings = || priors.iter().flat_map(|p| p.findings.iter());
        let critical = prior_findings().filter(|f| f.severity == Severity::Critical).count();
        let high = prior_findings().filter(|f| f.severity == Severity::High).count();
        let verdict_fit = match recommendation {
            Recommendation::Proceed if critical > 0 => {
                grades.rationale.push(format!(
                    "consistency: proceed despite {critical} critical prior finding(s)"
                ));
                0.3
            }
            Recommendation::Proceed if high > 0 => {
                grades.rationale.push(format!(
                    "consistency: unconditional proceed despite {high} high-severity finding(s)"
                ));
                0.6
            }
            Recommendation::DoNotProceed if critical == 0 && high == 0 => {
                grades
                    .rationale
                    .push("consistency: do_not_proceed without high-severity support".to_string());
                0.5
            }
            _ => 1.0,
        };
        grades.consistency = verdict_fit - 0.5 * duplicate_ratio(&synthesis.findings);

        match evidence_fraction(prior_findings().chain(synthesis.findings.iter())) {
            Some(backed) => {
                grades.evidence = 0.3 + 0.7 * backed;
                grades.rationale.push(format!(
                    "evidence: {:.0}% of all findings cite a source",
                    backed * 100.0
                ));
            }
            None => {
                grades.evidence = 0.2;
                grades.rationale.push("evidence: no findings in any stage".to_string());
            }
        }

        let serious: Vec<&Finding> = prior_findings().filter(|f| f.severity >= Severity::High).collect();
        let addressed = serious
            .iter()
            .filter(|f| is_addressed(f, &response_lower))
            .count();
        let coverage = if serious.is_empty() {
            1.0
        } else {
            ratio(addressed, serious.len())
        };
        let confidence_fit = match recommendation {
            Recommendation::Proceed if overall_confidence < 0.5 => 0.0,
            Recommendation::DoNotProceed if overall_confidence < 0.3 => 0.0,
            _ => 1.0,
        };
        grades.recommendation = 0.3 * f64::from(u8::from(explicit)) + 0.5 * coverage + 0.2 * confidence_fit;
        grades.rationale.push(format!(
            "recommendation: {recommendation} ({}), {addressed}/{} severe prior findings addressed",
            if explicit { "stated" } else { "defaulted" },
            serious.len()
        ));

        let summary_len = executive_summary.trim().chars().count();
        let summary_credit = (summary_len as f64 / MIN_EXECUTIVE_SUMMARY_CHARS as f64).min(1.0);
        let priors_done = ratio(priors.len().min(2), 2);
        let complete = if synthesis.findings.is_empty() {
            0.5
        } else {
            complete_fraction(&synthesis.findings)
        };
        grades.deliverable = 0.4 * summary_credit + 0.3 * priors_done + 0.3 * complete;
        if summary_credit < 1.0 {
            grades
                .rationale
                .push(format!("deliverable: executive summary only {summary_len} chars"));
        }

        grades.assess()
    }
}

fn methodology(stage: StageKind, response: &str) -> (f64, usize, usize) {
    let lower = response.to_ascii_lowercase();
    let list: Vec<String> = frameworks(stage).iter().map(|t| t.to_string()).collect();
    let hits = count_terms(&lower, &list);
    (0.4 + 0.6 * ratio(hits, list.len()), hits, list.len())
}

/// A prior finding counts as addressed when a distinctive word of its title
/// appears in the synthesis text.
fn is_addressed(finding: &Finding, synthesis_lower: &str) -> bool {
    finding
        .title
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 5)
        .any(|w| contains_term(synthesis_lower, w))
}
