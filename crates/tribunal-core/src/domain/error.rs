//! Error taxonomy for the pipeline.

use thiserror::Error;
use tribunal_llm::GenerationError;
use tribunal_state::{RunId, StorageError};

use crate::domain::run::StageKind;

/// Which limit a budget reservation ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    Stage,
    Run,
}

impl std::fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetLimit::Stage => f.write_str("stage allocation"),
            BudgetLimit::Run => f.write_str("run total"),
        }
    }
}

/// Ledger errors. Only `BudgetExceeded` is an ordinary outcome; the others
/// are contract violations by the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    #[error("{stage} requested {requested} tokens but only {available} remain in the {limit}")]
    BudgetExceeded {
        stage: StageKind,
        requested: u64,
        available: u64,
        limit: BudgetLimit,
    },

    #[error("{stage} already holds a reservation of {reserved} tokens")]
    AlreadyReserved { stage: StageKind, reserved: u64 },

    #[error("{stage} has no outstanding reservation")]
    NoReservation { stage: StageKind },

    #[error("{stage} used {actual} tokens against a reservation of {reserved}")]
    CommitExceedsReservation {
        stage: StageKind,
        reserved: u64,
        actual: u64,
    },
}

/// Why a single stage attempt failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("{stage} generation failed: {source}")]
    Generation {
        stage: StageKind,
        #[source]
        source: GenerationError,
    },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: StageKind, secs: u64 },

    #[error("{stage} returned an empty response")]
    EmptyResponse { stage: StageKind },
}

impl StageError {
    /// Transient failures worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Budget(_) => false,
            StageError::Generation { source, .. } => source.is_retryable(),
            StageError::Timeout { .. } | StageError::EmptyResponse { .. } => true,
        }
    }

    /// Ledger misuse. Never retried, always fatal.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StageError::Budget(
                BudgetError::AlreadyReserved { .. }
                    | BudgetError::NoReservation { .. }
                    | BudgetError::CommitExceedsReservation { .. }
            )
        )
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, StageError::Budget(BudgetError::BudgetExceeded { .. }))
    }
}

/// Top-level error for the validation service.
#[derive(Error, Debug)]
pub enum TribunalError {
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("run {run_id} failed in {stage} after {tokens_consumed} tokens: {source}")]
    RunFatal {
        run_id: RunId,
        stage: StageKind,
        tokens_consumed: u64,
        retry_safe: bool,
        #[source]
        source: StageError,
    },

    #[error("run {run_id} cancelled after {tokens_consumed} tokens")]
    Cancelled { run_id: RunId, tokens_consumed: u64 },

    #[error("run {run_id} ended without an outcome: {reason}")]
    Aborted { run_id: RunId, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TribunalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let timeout = StageError::Timeout {
            stage: StageKind::Skeptic,
            secs: 120,
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_contract_violation());

        let over = StageError::from(BudgetError::CommitExceedsReservation {
            stage: StageKind::Validator,
            reserved: 10,
            actual: 20,
        });
        assert!(over.is_contract_violation());
        assert!(!over.is_retryable());

        let denied = StageError::from(BudgetError::BudgetExceeded {
            stage: StageKind::Skeptic,
            requested: 40_000,
            available: 35_000,
            limit: BudgetLimit::Stage,
        });
        assert!(denied.is_budget_exceeded());
        assert!(!denied.is_retryable());
        assert!(!denied.is_contract_violation());
    }

    #[test]
    fn generation_errors_follow_provider_classification() {
        let rate_limited = StageError::Generation {
            stage: StageKind::Synthesis,
            source: GenerationError::RateLimited {
                message: "slow down".into(),
            },
        };
        assert!(rate_limited.is_retryable());

        let bad_request = StageError::Generation {
            stage: StageKind::Synthesis,
            source: GenerationError::Http {
                status: 400,
                message: "bad".into(),
            },
        };
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn budget_message_names_the_limit() {
        let err = BudgetError::BudgetExceeded {
            stage: StageKind::Skeptic,
            requested: 40_000,
            available: 35_000,
            limit: BudgetLimit::Stage,
        };
        assert_eq!(
            err.to_string(),
            "skeptic requested 40000 tokens but only 35000 remain in the stage allocation"
        );
    }
}
