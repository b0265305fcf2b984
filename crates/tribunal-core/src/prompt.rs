//! Stage prompt construction.
//!
//! Each stage gets a fixed system prompt and a user message assembled from
//! the request and the findings of earlier stages. The compact form trims
//! the context so a retry fits a tighter budget.

use std::fmt::Write;

use crate::budget::estimate_tokens;
use crate::domain::report::StageResult;
use crate::domain::request::ValidationRequest;
use crate::domain::run::StageKind;
use crate::extract::text::truncate_chars;

const SKEPTIC_SYSTEM: &str = "\
You are the skeptic on an investment review tribunal. Your job is to find every reason this \
decision could fail. Use a pre-mortem, a devil's advocate stance, worst case and downside \
scenarios, failure mode analysis, stress tests of key assumptions and base rates for similar \
deals.

Report each risk as a numbered item:
N. **Title**: description, citing the page, section or document that supports it.
   Severity: critical | high | medium | low
   State what should be done about it.

Open with one paragraph summarising the overall risk picture.";

const VALIDATOR_SYSTEM: &str = "\
You are the validator on an investment review tribunal. For every skeptic finding, check \
the evidence: verify it against the source documents, corroborate or triangulate figures, \
cross-check claims and say whether each finding is confirmed, overstated or unsupported.

Report each validated finding as a numbered item:
N. **Title**: assessment, citing the page, section or document used.
   Severity: critical | high | medium | low (after validation)
   State what must be confirmed before a decision.

Open with one paragraph summarising how well the skeptic's case holds up.";

const SYNTHESIS_SYSTEM: &str = "\
You are the chair of an investment review tribunal. Weigh the skeptic's risks against the \
validator's evidence, consider trade-offs, mitigations and scenarios, and make a risk-adjusted \
go/no-go call.

Respond with:
## Executive Summary
One paragraph for decision makers.

## Recommendation
One of: PROCEED, PROCEED_WITH_CONDITIONS, DO_NOT_PROCEED.
Overall confidence: NN%

Then list the conditions or decisive factors as numbered items, each citing the underlying \
finding.";

/// Limits applied while rendering the request context.
#[derive(Debug, Clone, Copy)]
struct RenderLimits {
    summary_chars: usize,
    key_points: usize,
    data_points: usize,
    finding_description_chars: usize,
}

const FULL: RenderLimits = RenderLimits {
    summary_chars: 4_000,
    key_points: usize::MAX,
    data_points: usize::MAX,
    finding_description_chars: 500,
};

const COMPACT: RenderLimits = RenderLimits {
    summary_chars: 400,
    key_points: 3,
    data_points: 10,
    finding_description_chars: 160,
};

/// A ready-to-send prompt for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePrompt {
    pub stage: StageKind,
    pub system: String,
    pub user: String,
    pub compact: bool,
}

impl StagePrompt {
    /// Estimated input tokens for system plus user text.
    pub fn estimated_tokens(&self) -> u64 {
        estimate_tokens(&self.system) + estimate_tokens(&self.user)
    }
}

/// Build the prompt for `stage`. `prior` holds results of earlier stages in order.
pub fn build_prompt(
    stage: StageKind,
    request: &ValidationRequest,
    prior: &[StageResult],
    compact: bool,
) -> StagePrompt {
    let limits = if compact { COMPACT } else { FULL };
    let mut user = String::new();

    render_request(&mut user, request, limits);

    match stage {
        StageKind::Skeptic => {
            user.push_str("\nIdentify the risks in this opportunity.\n");
        }
        StageKind::Validator => {
            render_stage(&mut user, prior, StageKind::Skeptic, limits);
            user.push_str("\nValidate each skeptic finding above, by number.\n");
        }
        StageKind::Synthesis => {
            render_stage(&mut user, prior, StageKind::Skeptic, limits);
            render_stage(&mut user, prior, StageKind::Validator, limits);
            user.push_str("\nDeliver the tribunal's recommendation.\n");
        }
    }

    let system = match stage {
        StageKind::Skeptic => SKEPTIC_SYSTEM,
        StageKind::Validator => VALIDATOR_SYSTEM,
        StageKind::Synthesis => SYNTHESIS_SYSTEM,
    };

    StagePrompt {
        stage,
        system: system.to_string(),
        user,
        compact,
    }
}

fn render_request(out: &mut String, request: &ValidationRequest, limits: RenderLimits) {
    out.push_str("# Objectives\n");
    for (i, objective) in request.objectives.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, objective.trim());
    }

    let context = &request.context;
    if !context.documents.is_empty() {
        out.push_str("\n# Documents\n");
        for doc in &context.documents {
            match &doc.kind {
                Some(kind) => {
                    let _ = writeln!(out, "## {} ({kind})", doc.name);
                }
                None => {
                    let _ = writeln!(out, "## {}", doc.name);
                }
            }
            let _ = writeln!(out, "{}", truncate_chars(&doc.summary, limits.summary_chars));
            for point in doc.key_points.iter().take(limits.key_points) {
                let _ = writeln!(out, "- {point}");
            }
        }
    }

    if !context.key_data_points.is_empty() {
        out.push_str("\n# Key data points\n");
        for (name, value) in context.key_data_points.iter().take(limits.data_points) {
            let _ = writeln!(out, "- {name}: {value}");
        }
    }
}

fn render_stage(out: &mut String, prior: &[StageResult], stage: StageKind, limits: RenderLimits) {
    let Some(result) = prior.iter().find(|r| r.stage == stage) else {
        return;
    };
    let _ = writeln!(out, "\n# {} findings", capitalize(stage.name()));
    if result.findings.is_empty() {
        let _ = writeln!(out, "(none extracted) {}", result.summary);
        return;
    }
    for (i, finding) in result.findings.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}/{}] {} (confidence {:.2})",
            i + 1,
            finding.severity.name(),
            finding.category.name(),
            finding.title,
            finding.confidence
        );
        let _ = writeln!(
            out,
            "   {}",
            truncate_chars(&finding.description, limits.finding_description_chars)
        );
        if !finding.evidence_references.is_empty() {
            let _ = writeln!(out, "   Evidence: {}", finding.evidence_references.join(", "));
        }
    }
    if let Some(verdict) = &result.verdict {
        let _ = writeln!(out, "Recommendation: {}", verdict.recommendation);
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::{Category, Finding, Severity};
    use crate::domain::report::TokenUsage;
    use crate::domain::request::{AnalysisContext, DocumentSummary};
    use crate::quality::QualityScorer;
    use crate::extract::FindingExtractor;
    use tribunal_state::ContentDigest;

    fn request(summary_len: usize) -> ValidationRequest {
        ValidationRequest::new(
            vec!["Assess the Acme acquisition".into()],
            AnalysisContext {
                documents: vec![DocumentSummary {
                    name: "cim.pdf".into(),
                    kind: Some("memorandum".into()),
                    summary: "x".repeat(summary_len),
                    key_points: (1..=6).map(|i| format!("point {i}")).collect(),
                }],
                key_data_points: Default::default(),
            },
        )
    }

    fn skeptic_result() -> StageResult {
        let finding = |title: &str| Finding {
            title: title.into(),
            description: "Described".into(),
            category: Category::Market,
            severity: Severity::High,
            confidence: 0.6,
            evidence_references: vec!["page 3".into()],
            action_required: true,
            recommended_actions: vec![],
        };
        let extraction = FindingExtractor::default().extract("", StageKind::Skeptic);
        StageResult {
            stage: StageKind::Skeptic,
            findings: vec![finding("Churn"), finding("Pricing pressure")],
            summary: "Two risks".into(),
            confidence: 0.6,
            quality: QualityScorer.score(StageKind::Skeptic, "", &extraction),
            usage: TokenUsage::default(),
            response: String::new(),
            response_digest: ContentDigest::from_bytes(b""),
            extraction_degraded: false,
            verdict: None,
            attempts: 1,
        }
    }

    #[test]
    fn validator_prompt_enumerates_skeptic_findings() {
        let prompt = build_prompt(StageKind::Validator, &request(100), &[skeptic_result()], false);
        assert!(prompt.user.contains("1. [high/market] Churn"));
        assert!(prompt.user.contains("2. [high/market] Pricing pressure"));
        assert!(prompt.user.contains("Evidence: page 3"));
        assert!(prompt.system.contains("validator"));
    }

    #[test]
    fn skeptic_prompt_has_no_prior_findings() {
        let prompt = build_prompt(StageKind::Skeptic, &request(100), &[], false);
        assert!(prompt.user.contains("# Objectives\n1. Assess the Acme acquisition"));
        assert!(!prompt.user.contains("findings"));
    }

    #[test]
    fn compact_prompt_is_smaller() {
        let full = build_prompt(StageKind::Skeptic, &request(20_000), &[], false);
        let compact = build_prompt(StageKind::Skeptic, &request(20_000), &[], true);
        assert!(compact.estimated_tokens() < full.estimated_tokens());
        assert!(compact.user.contains("- point 3"));
        assert!(!compact.user.contains("- point 4"));
    }
}
