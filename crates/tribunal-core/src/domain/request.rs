//! Caller-supplied input to a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tribunal_state::ContentDigest;

use crate::domain::error::TribunalError;

/// Condensed view of one source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub name: String,
    /// Free-form document type, e.g. "financial_statements" or "contract".
    #[serde(default)]
    pub kind: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Everything the analysis stages read: document summaries plus key data points.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisContext {
    #[serde(default)]
    pub documents: Vec<DocumentSummary>,
    /// Named figures such as `"ARR" -> "$14.2M"`. Ordered so the digest is stable.
    #[serde(default)]
    pub key_data_points: BTreeMap<String, String>,
}

impl AnalysisContext {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.key_data_points.is_empty()
    }
}

/// Objectives plus context: the full input of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRequest {
    pub objectives: Vec<String>,
    #[serde(default)]
    pub context: AnalysisContext,
}

impl ValidationRequest {
    pub fn new(objectives: Vec<String>, context: AnalysisContext) -> Self {
        Self {
            objectives,
            context,
        }
    }

    /// Reject requests the pipeline cannot meaningfully analyze.
    pub fn validate(&self) -> Result<(), TribunalError> {
        if self.objectives.iter().all(|o| o.trim().is_empty()) {
            return Err(TribunalError::InvalidRequest(
                "at least one non-empty objective is required".to_string(),
            ));
        }
        if let Some(doc) = self.context.documents.iter().find(|d| d.name.trim().is_empty()) {
            return Err(TribunalError::InvalidRequest(format!(
                "document with summary {:?} has no name",
                doc.summary.chars().take(40).collect::<String>()
            )));
        }
        Ok(())
    }

    /// SHA-256 over the canonical JSON encoding; identical requests share a digest.
    pub fn digest(&self) -> Result<ContentDigest, TribunalError> {
        let canonical = serde_json::to_vec(self)?;
        Ok(ContentDigest::from_bytes(&canonical))
    }
}
