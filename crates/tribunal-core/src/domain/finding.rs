//! Structured findings extracted from stage responses.

use serde::{Deserialize, Serialize};

/// Subject area of a finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Financial,
    Market,
    Operational,
    Legal,
    Strategic,
    General,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Financial => "financial",
            Category::Market => "market",
            Category::Operational => "operational",
            Category::Legal => "legal",
            Category::Strategic => "strategic",
            Category::General => "general",
        }
    }
}

/// How much a finding matters to the decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Numeric weight on (0, 1] used by the quality rubric.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

/// One structured unit of analysis. Immutable once extracted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    /// Confidence on [0, 1].
    pub confidence: f64,
    pub evidence_references: Vec<String>,
    pub action_required: bool,
    pub recommended_actions: Vec<String>,
}

impl Finding {
    /// Non-empty title and description, confidence on [0, 1].
    pub fn is_well_formed(&self) -> bool {
        !self.title.trim().is_empty()
            && !self.description.trim().is_empty()
            && (0.0..=1.0).contains(&self.confidence)
    }

    pub fn has_evidence(&self) -> bool {
        !self.evidence_references.is_empty()
    }
}
