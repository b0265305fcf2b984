//! Synthesis verdict parsing: recommendation, stated confidence, executive summary.

use std::sync::OnceLock;

use regex::Regex;

use super::text::{cached, is_marker_line, truncate_chars};
use crate::domain::report::Recommendation;

// Checked in this order, so a negated "proceed" is never read as a go.
const DO_NOT_PROCEED: &[&str] = &[
    "do not proceed",
    "don't proceed",
    "should not proceed",
    "not proceed",
    "walk away",
    "reject the",
];
const WITH_CONDITIONS: &[&str] = &[
    "proceed with conditions",
    "proceed subject to",
    "proceed conditionally",
    "conditional proceed",
    "conditionally proceed",
    "with conditions",
];
const PROCEED: &[&str] = &["proceed"];

/// Collapse `_`, markdown emphasis and runs of whitespace so phrases match.
fn normalize(text: &str) -> String {
    let lowered: String = text
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '_' { ' ' } else { c })
        .filter(|c| !matches!(c, '*' | '`'))
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify(window: &str) -> Option<Recommendation> {
    let tiers = [
        (DO_NOT_PROCEED, Recommendation::DoNotProceed),
        (WITH_CONDITIONS, Recommendation::ProceedWithConditions),
        (PROCEED, Recommendation::Proceed),
    ];
    tiers
        .into_iter()
        .find(|(phrases, _)| phrases.iter().any(|p| window.contains(p)))
        .map(|(_, rec)| rec)
}

/// Recommendation stated in `text`, if any.
///
/// A labelled "Recommendation: ..." wins over phrases elsewhere in the text.
pub(crate) fn parse_recommendation(text: &str) -> Option<Recommendation> {
    let normalized = normalize(text);
    let mut from = 0;
    while let Some(pos) = normalized[from..].find("recommendation") {
        let start = from + pos + "recommendation".len();
        let window: String = normalized[start..].chars().take(120).collect();
        if let Some(rec) = classify(&window) {
            return Some(rec);
        }
        from = start;
    }
    classify(&normalized)
}

fn confidence_regex() -> Option<&'static Regex> {
    static CONFIDENCE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &CONFIDENCE,
        r"(?i)overall\s+confidence(?:\s+(?:level|score))?[^0-9\n]{0,20}?(\d{1,3}(?:\.\d+)?)\s*(%?)",
    )
}

/// "Overall confidence: 72%" or "overall confidence 0.72" as a fraction.
pub(crate) fn stated_confidence(text: &str) -> Option<f64> {
    let caps = confidence_regex()?.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let percent = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
    let fraction = if percent || value > 1.0 {
        value / 100.0
    } else {
        value
    };
    (0.0..=1.0).contains(&fraction).then_some(fraction)
}

/// Text under an "Executive Summary" label, up to the next block.
pub(crate) fn executive_summary(text: &str, max_chars: usize) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("executive summary")? + "executive summary".len();
    let rest = &text[start..];

    let mut lines = Vec::new();
    let mut first = true;
    for line in rest.lines() {
        let label_line = first;
        first = false;
        let cleaned = if label_line {
            line.trim_start_matches(|c: char| matches!(c, ':' | '*' | '#' | '-' | ' '))
        } else {
            line
        };
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        if !label_line && is_marker_line(line) {
            break;
        }
        lines.push(trimmed.to_string());
    }

    let summary = lines.join(" ");
    (!summary.is_empty()).then(|| truncate_chars(&summary, max_chars))
}
