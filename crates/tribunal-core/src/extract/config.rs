//! Extraction heuristics configuration
//!
//! Vocabularies and limits used by [`super::FindingExtractor`]. Everything is
//! data, so deployments can tune heuristics from a TOML file without a
//! rebuild. Missing keys fall back to the defaults below.
//!
//! Terms match whole words, case-insensitively. A trailing `*` turns a term
//! into a prefix match: `regulat*` matches "regulatory" and "regulation".

use serde::{Deserialize, Serialize};

use crate::domain::finding::Category;

/// Keywords that place a finding in a category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryVocabulary {
    pub category: Category,
    pub keywords: Vec<String>,
}

/// Severity terms, checked critical-first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeverityVocabulary {
    pub critical: Vec<String>,
    pub high: Vec<String>,
    pub medium: Vec<String>,
}

/// Evidence-based confidence estimate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceModel {
    pub base: f64,
    pub evidence_step: f64,
    pub max_evidence_bonus: f64,
    pub assumption_step: f64,
    pub max_assumption_penalty: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub evidence_terms: Vec<String>,
    pub assumption_terms: Vec<String>,
}

/// Full extractor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Segments shorter than this (in characters) are noise.
    pub min_segment_chars: usize,
    pub max_title_chars: usize,
    pub max_description_chars: usize,
    pub max_findings_risk: usize,
    pub max_findings_synthesis: usize,
    pub max_evidence_refs: usize,
    pub max_recommended_actions: usize,
    pub max_action_chars: usize,
    pub max_summary_chars: usize,
    /// Presence of any of these marks a finding as requiring action.
    pub action_verbs: Vec<String>,
    /// Checked in order; first match wins, otherwise `general`.
    pub categories: Vec<CategoryVocabulary>,
    pub severity: SeverityVocabulary,
    pub confidence: ConfidenceModel,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

impl Default for SeverityVocabulary {
    fn default() -> Self {
        Self {
            critical: terms(&[
                "critical",
                "deal-breaker",
                "deal breaker",
                "dealbreaker",
                "fatal",
                "severe",
                "showstopper",
            ]),
            high: terms(&["high", "major", "significant", "serious"]),
            medium: terms(&["medium", "material", "moderate"]),
        }
    }
}

impl Default for ConfidenceModel {
    fn default() -> Self {
        Self {
            base: 0.5,
            evidence_step: 0.1,
            max_evidence_bonus: 0.3,
            assumption_step: 0.1,
            max_assumption_penalty: 0.3,
            floor: 0.1,
            ceiling: 0.95,
            evidence_terms: terms(&[
                "data",
                "evidence",
                "document*",
                "report*",
                "shows",
                "confirmed",
                "verified",
                "audited",
                "according to",
                "per the",
            ]),
            assumption_terms: terms(&[
                "assum*",
                "may",
                "might",
                "could",
                "possibly",
                "unclear",
                "unverified",
                "speculat*",
                "estimat*",
            ]),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let vocab = |category: Category, keywords: &[&str]| CategoryVocabulary {
            category,
            keywords: terms(keywords),
        };
        Self {
            min_segment_chars: 30,
            max_title_chars: 100,
            max_description_chars: 500,
            max_findings_risk: 10,
            max_findings_synthesis: 5,
            max_evidence_refs: 5,
            max_recommended_actions: 3,
            max_action_chars: 80,
            max_summary_chars: 600,
            action_verbs: terms(&["recommend*", "should", "must", "need*"]),
            categories: vec![
                vocab(
                    Category::Financial,
                    &[
                        "revenue*",
                        "ebitda",
                        "margin*",
                        "cash flow*",
                        "debt",
                        "valuation*",
                        "profit*",
                        "cost*",
                        "capital",
                        "financ*",
                        "earnings",
                        "liquidity",
                        "leverage",
                        "arr",
                    ],
                ),
                vocab(
                    Category::Market,
                    &[
                        "market*",
                        "competit*",
                        "customer*",
                        "demand",
                        "pricing",
                        "market share",
                        "churn",
                        "segment*",
                        "tam",
                    ],
                ),
                vocab(
                    Category::Operational,
                    &[
                        "operation*",
                        "supply chain",
                        "process*",
                        "staff*",
                        "employee*",
                        "technolog*",
                        "integration",
                        "capacity",
                        "vendor*",
                        "execution",
                        "key person",
                    ],
                ),
                vocab(
                    Category::Legal,
                    &[
                        "legal",
                        "regulat*",
                        "compliance",
                        "litigation",
                        "contract*",
                        "licens*",
                        "liabilit*",
                        "intellectual property",
                        "lawsuit*",
                        "gdpr",
                        "indemnif*",
                    ],
                ),
                vocab(
                    Category::Strategic,
                    &[
                        "strateg*",
                        "synerg*",
                        "growth",
                        "positioning",
                        "acquisition*",
                        "partnership*",
                        "vision",
                        "moat",
                        "roadmap",
                    ],
                ),
            ],
            severity: SeverityVocabulary::default(),
            confidence: ConfidenceModel::default(),
        }
    }
}

impl ExtractorConfig {
    /// Parse from TOML; absent keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Render as TOML, e.g. as a starting point for a custom heuristics file.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
