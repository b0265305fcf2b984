//! Tribunal-State: persistence for pipeline runs
//!
//! This crate is the persistence collaborator for the Tribunal pipeline. It
//! stores runs, stage executions, findings, quality assessments and status
//! events behind the [`AnalysisStore`] trait.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: idempotent writes keyed by run ID + stage + sequence.
//!
//! ## Key Components
//!
//! - `AnalysisStore`: backend-agnostic async storage trait
//! - `MemoryAnalysisStore`: in-memory fake for tests
//! - `SurrealAnalysisStore`: SurrealDB backend (`mem://`, `surrealkv://`, `ws://`)

mod error;
pub mod fakes;
pub mod migrations;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::MemoryAnalysisStore;
pub use storage_traits::{
    record_key, AnalysisStore, ContentDigest, FindingRecord, QualityRecord, RecordStatus, RunId,
    RunRecord, StageExecutionRecord, StatusEventRecord, StorageResult,
};
pub use surreal_store::SurrealAnalysisStore;
