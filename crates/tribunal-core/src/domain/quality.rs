//! Graded output of the quality rubric.

use serde::{Deserialize, Serialize};

/// Five weighted sub-scores plus the aggregate and threshold verdict.
///
/// Computed once per stage and once for the run; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityAssessment {
    pub methodology: f64,
    pub internal_consistency: f64,
    pub evidence_quality: f64,
    pub recommendation_logic: f64,
    pub deliverable_quality: f64,
    pub aggregate: f64,
    pub standard_met: bool,
    /// One line per rule that moved a sub-score.
    pub rationale: Vec<String>,
}

impl QualityAssessment {
    /// Sub-scores in rubric order, paired with their names.
    pub fn sub_scores(&self) -> [(&'static str, f64); 5] {
        [
            ("methodology", self.methodology),
            ("internal_consistency", self.internal_consistency),
            ("evidence_quality", self.evidence_quality),
            ("recommendation_logic", self.recommendation_logic),
            ("deliverable_quality", self.deliverable_quality),
        ]
    }

    /// Lowest-scoring sub-score, the first place to look when the standard is missed.
    pub fn weakest(&self) -> (&'static str, f64) {
        self.sub_scores()
            .into_iter()
            .fold(("methodology", f64::INFINITY), |acc, s| {
                if s.1 < acc.1 {
                    s
                } else {
                    acc
                }
            })
    }
}
