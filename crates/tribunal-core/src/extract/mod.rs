//! Finding extraction
//!
//! Turns a free-text stage response into structured [`Finding`]s with
//! deterministic heuristics: segmentation on list markers, keyword
//! classification, evidence-based confidence and citation scanning. Pure and
//! total: any input, including empty or malformed text, yields a (possibly
//! empty) result.

mod config;
pub(crate) mod text;
mod verdict;

use std::sync::OnceLock;

use regex::Regex;

pub use config::{CategoryVocabulary, ConfidenceModel, ExtractorConfig, SeverityVocabulary};

use crate::domain::finding::{Category, Finding, Severity};
use crate::domain::report::{Recommendation, SynthesisVerdict};
use crate::domain::run::StageKind;
use text::{cached, clean_inline, count_terms, find_term, sentences, truncate_chars, Segment};

/// Section labels that structure a response but are not findings.
const SECTION_LABELS: &[&str] = &[
    "executive summary",
    "summary",
    "overall recommendation",
    "final recommendation",
    "recommendation",
    "overall confidence",
    "conclusion",
];

/// Everything extracted from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub findings: Vec<Finding>,
    pub summary: String,
    /// Stated overall confidence, else the mean finding confidence.
    pub confidence: f64,
    /// Only populated for synthesis.
    pub verdict: Option<SynthesisVerdict>,
    /// The response had text but no finding could be extracted.
    pub degraded: bool,
}

/// Heuristic parser from stage response text to findings.
#[derive(Debug, Clone, Default)]
pub struct FindingExtractor {
    config: ExtractorConfig,
}

fn evidence_regex() -> Option<&'static Regex> {
    static EVIDENCE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &EVIDENCE,
        r"(?i)(?:\b(?:pages?|pp?\.|section|sec\.|exhibit|schedule|table|appendix|annex|slide|sheet|clause|note)\s*[#:]?\s*\d[\w.\-]*|§\s*\d[\w.\-]*|\b[\w\-]+\.(?:pdf|xlsx|xls|csv|docx|pptx)\b)",
    )
}

fn severity_label_regex() -> Option<&'static Regex> {
    static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &LABEL,
        r"(?i)\bseverity\s*[:=\-]?\s*\**\s*(critical|high|medium|low)\b",
    )
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl FindingExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract findings, summary and confidence from a stage response.
    pub fn extract(&self, response: &str, stage: StageKind) -> Extraction {
        let segments = text::segment(response);
        let has_markers = segments.iter().any(|s| s.marker_led);
        let limit = if stage.is_risk_stage() {
            self.config.max_findings_risk
        } else {
            self.config.max_findings_synthesis
        };

        let findings: Vec<Finding> = segments
            .iter()
            .filter(|s| !has_markers || s.marker_led)
            .filter(|s| s.char_len() >= self.config.min_segment_chars)
            .filter(|s| !is_section_label(&s.head))
            .filter_map(|s| self.build_finding(s))
            .take(limit)
            .collect();

        let mean_confidence = if findings.is_empty() {
            0.0
        } else {
            round2(findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64)
        };
        let confidence = verdict::stated_confidence(response).unwrap_or(mean_confidence);

        let preamble = if has_markers {
            segments
                .iter()
                .take_while(|s| !s.marker_led)
                .map(Segment::text)
                .find(|t| t.trim().chars().count() >= 20)
        } else {
            None
        };
        let summary = self.summarize(preamble.as_deref(), &findings, response);

        let verdict = (!stage.is_risk_stage()).then(|| {
            let stated = verdict::parse_recommendation(response);
            SynthesisVerdict {
                recommendation: stated.unwrap_or(Recommendation::ProceedWithConditions),
                explicit: stated.is_some(),
                overall_confidence: confidence,
                executive_summary: verdict::executive_summary(
                    response,
                    self.config.max_summary_chars,
                )
                .unwrap_or_else(|| summary.clone()),
            }
        });

        Extraction {
            degraded: !response.trim().is_empty() && findings.is_empty(),
            findings,
            summary,
            confidence,
            verdict,
        }
    }

    fn summarize(&self, preamble: Option<&str>, findings: &[Finding], response: &str) -> String {
        let max = self.config.max_summary_chars;
        if let Some(preamble) = preamble {
            return truncate_chars(&collapse_whitespace(preamble), max);
        }
        if !findings.is_empty() {
            let titles: Vec<&str> = findings.iter().take(3).map(|f| f.title.as_str()).collect();
            let noun = if findings.len() == 1 { "finding" } else { "findings" };
            return truncate_chars(
                &format!("{} {}: {}", findings.len(), noun, titles.join("; ")),
                max,
            );
        }
        truncate_chars(&collapse_whitespace(response), max.min(200))
    }

    fn build_finding(&self, segment: &Segment) -> Option<Finding> {
        let (title_part, inline_rest) = split_head(&segment.head, self.config.max_title_chars);
        let mut title = clean_inline(title_part);

        let mut description_parts: Vec<String> = Vec::new();
        if let Some(rest) = inline_rest {
            description_parts.push(rest.trim().to_string());
        }
        description_parts.extend(segment.body.iter().cloned());
        let mut description = collapse_whitespace(&description_parts.join(" "));
        if description.is_empty() {
            description = clean_inline(&segment.head);
        }
        if title.is_empty() {
            title = description.split_whitespace().take(8).collect::<Vec<_>>().join(" ");
        }
        if title.is_empty() || description.is_empty() {
            return None;
        }

        let full = segment.text();
        let lower = full.to_ascii_lowercase();
        let evidence_references = self.evidence_references(&full);
        let confidence = self.confidence(&lower, !evidence_references.is_empty());
        let action_required = count_terms(&lower, &self.config.action_verbs) > 0;
        let recommended_actions = if action_required {
            self.recommended_actions(&full)
        } else {
            Vec::new()
        };

        Some(Finding {
            title: truncate_chars(&title, self.config.max_title_chars),
            description: truncate_chars(&description, self.config.max_description_chars),
            category: self.classify(&lower),
            severity: self.severity(&full, &lower),
            confidence,
            evidence_references,
            action_required,
            recommended_actions,
        })
    }

    fn classify(&self, lower: &str) -> Category {
        self.config
            .categories
            .iter()
            .find(|vocab| count_terms(lower, &vocab.keywords) > 0)
            .map(|vocab| vocab.category)
            .unwrap_or(Category::General)
    }

    fn severity(&self, full: &str, lower: &str) -> Severity {
        let labelled = severity_label_regex()
            .and_then(|re| re.captures(full))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_lowercase());
        match labelled.as_deref() {
            Some("critical") => return Severity::Critical,
            Some("high") => return Severity::High,
            Some("medium") => return Severity::Medium,
            Some("low") => return Severity::Low,
            _ => {}
        }

        let vocab = &self.config.severity;
        if count_terms(lower, &vocab.critical) > 0 {
            Severity::Critical
        } else if count_terms(lower, &vocab.high) > 0 {
            Severity::High
        } else if count_terms(lower, &vocab.medium) > 0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn confidence(&self, lower: &str, has_references: bool) -> f64 {
        let model = &self.config.confidence;
        let evidence_hits = count_terms(lower, &model.evidence_terms) + usize::from(has_references);
        let assumption_hits = count_terms(lower, &model.assumption_terms);
        let bonus = (evidence_hits as f64 * model.evidence_step).min(model.max_evidence_bonus);
        let penalty =
            (assumption_hits as f64 * model.assumption_step).min(model.max_assumption_penalty);
        // max/min rather than clamp: a misconfigured floor above the ceiling must not panic.
        let value = (model.base + bonus - penalty)
            .max(model.floor)
            .min(model.ceiling)
            .max(0.0)
            .min(1.0);
        if value.is_nan() {
            return model.base.max(0.0).min(1.0);
        }
        round2(value)
    }

    fn evidence_references(&self, full: &str) -> Vec<String> {
        let Some(re) = evidence_regex() else {
            return Vec::new();
        };
        let mut refs: Vec<String> = Vec::new();
        for m in re.find_iter(full) {
            let reference = collapse_whitespace(m.as_str())
                .trim_end_matches(['.', '-', ','])
                .to_string();
            if !refs.iter().any(|r| r.eq_ignore_ascii_case(&reference)) {
                refs.push(reference);
            }
            if refs.len() >= self.config.max_evidence_refs {
                break;
            }
        }
        refs
    }

    fn recommended_actions(&self, full: &str) -> Vec<String> {
        let mut actions: Vec<String> = Vec::new();
        for sentence in sentences(full) {
            if actions.len() >= self.config.max_recommended_actions {
                break;
            }
            let lower = sentence.to_ascii_lowercase();
            let Some(end) = self
                .config
                .action_verbs
                .iter()
                .find_map(|verb| find_term(&lower, verb).map(|(_, end)| end))
            else {
                continue;
            };
            let tail = strip_action_lead(&sentence[end..]);
            if tail.split_whitespace().count() < 2 {
                continue;
            }
            let action = truncate_chars(&capitalize(tail), self.config.max_action_chars);
            if !actions.iter().any(|a| a.eq_ignore_ascii_case(&action)) {
                actions.push(action);
            }
        }
        actions
    }
}

fn is_section_label(head: &str) -> bool {
    let cleaned = clean_inline(head).to_ascii_lowercase();
    let label = cleaned.split(':').next().unwrap_or("").trim();
    SECTION_LABELS.iter().any(|l| label == *l)
}

/// Split "Title: detail" or "Title - detail" heads when the title part is short.
fn split_head(head: &str, max_title: usize) -> (&str, Option<&str>) {
    for sep in [":", " - ", " \u{2013} ", " \u{2014} "] {
        if let Some(idx) = head.find(sep) {
            let (title, rest) = (&head[..idx], &head[idx + sep.len()..]);
            let usable = !clean_inline(title).is_empty() && !rest.trim().is_empty();
            if usable && title.chars().count() <= max_title {
                return (title, Some(rest));
            }
        }
    }
    (head, None)
}

fn strip_action_lead(tail: &str) -> &str {
    let mut rest = tail.trim_start_matches(|c: char| !c.is_alphanumeric());
    for lead in ["to ", "be ", "that ", "the buyer ", "we "] {
        if rest.get(..lead.len()).is_some_and(|head| head.eq_ignore_ascii_case(lead)) {
            rest = rest[lead.len()..].trim_start();
        }
    }
    rest.trim()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
