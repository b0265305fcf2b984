//! Shared fixtures for tribunal-core integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tribunal_core::{
    AnalysisContext, DocumentSummary, FindingExtractor, PipelineConfig, StatusEvent, Subscription,
    ValidationRequest, ValidationService,
};
use tribunal_llm::ScriptedGenerator;
use tribunal_state::{
    AnalysisStore, FindingRecord, MemoryAnalysisStore, QualityRecord, RunId, RunRecord,
    StageExecutionRecord, StatusEventRecord, StorageError, StorageResult,
};

pub const SKEPTIC_RESPONSE: &str = "\
Running a pre-mortem on this deal, the downside is dominated by customer concentration \
and integration execution. Key assumptions were stress tested against base rates.

1. **Customer concentration**: The top three customers account for 58% of revenue according \
to the CIM page 14. Losing one would erase a year of growth.
   Severity: critical. We recommend securing multi-year renewals before signing.
2. **Integration cost overrun**: The integration plan in Section 6.2 budgets $1.2M, roughly \
half the base rate for deals of this size.
   Severity: high. Management should provide a bottom-up integration estimate.
3. **Pricing pressure**: Competitors cut list prices 15% last year per the market study, \
exhibit 4, and churn may rise as contracts renew.
   Severity: medium. The buyer needs a pricing sensitivity analysis.";

pub const VALIDATOR_RESPONSE: &str = "\
We verified each skeptic finding against the source documents and cross-checked the data.

1. **Customer concentration confirmed**: The revenue data in the CIM page 14 and the audited \
accounts, schedule 3, both show 58% concentration. Evidence is strong.
   Severity: critical. Renewals must be confirmed before signing.
2. **Integration cost overstated**: The Section 6.2 budget excludes systems migration, which \
the IT report, page 9, estimates at $0.8M. The gap is real but smaller than claimed.
   Severity: high. The buyer should commission an independent integration review.
3. **Pricing pressure unsupported**: The market study, exhibit 4, shows price cuts only in \
the low-end segment where the target does not compete.
   Severity: low.";

pub const SYNTHESIS_RESPONSE: &str = "\
## Executive Summary
Weighing the skeptic's risks against the validator's evidence, the acquisition is attractive \
on a risk-adjusted basis provided customer concentration and integration cost are mitigated \
before close. Pricing pressure does not survive scrutiny.

## Recommendation
PROCEED_WITH_CONDITIONS
Overall confidence: 72%

1. **Secure renewals**: Customer concentration is confirmed by the CIM page 14; close only \
after the top three customers sign multi-year renewals.
2. **Integration budget**: Integration cost must be re-baselined at $2.0M per the IT report, \
page 9, with a price adjustment mechanism.";

/// Synthesis output too thin to meet the quality standard.
pub const THIN_SYNTHESIS_RESPONSE: &str = "Proceed.";

pub fn request() -> ValidationRequest {
    let mut key_data_points = BTreeMap::new();
    key_data_points.insert("ARR".to_string(), "$14.2M".to_string());
    key_data_points.insert("Top-3 customer share".to_string(), "58%".to_string());
    ValidationRequest::new(
        vec!["Assess the acquisition of Acme Analytics".to_string()],
        AnalysisContext {
            documents: vec![DocumentSummary {
                name: "cim.pdf".to_string(),
                kind: Some("memorandum".to_string()),
                summary: "Confidential information memorandum for Acme Analytics, a B2B \
                          analytics vendor with $14.2M ARR."
                    .to_string(),
                key_points: vec![
                    "Top 3 customers are 58% of revenue".to_string(),
                    "Integration budget of $1.2M".to_string(),
                ],
            }],
            key_data_points,
        },
    )
}

/// Fast retries and a heartbeat that stays out of the way.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_retries(2, 1)
        .with_heartbeat_ms(60_000)
}

/// Script a full successful run with the given per-stage token usage.
pub fn script_success(generator: &ScriptedGenerator) {
    generator.push_text(SKEPTIC_RESPONSE, 3_000, 1_500);
    generator.push_text(VALIDATOR_RESPONSE, 4_000, 1_500);
    generator.push_text(SYNTHESIS_RESPONSE, 2_500, 800);
}

pub fn service_with(
    generator: Arc<ScriptedGenerator>,
    store: Arc<dyn AnalysisStore>,
    config: PipelineConfig,
) -> ValidationService {
    ValidationService::new(generator, store, FindingExtractor::default(), config)
}

pub fn service(generator: Arc<ScriptedGenerator>, config: PipelineConfig) -> ValidationService {
    service_with(generator, Arc::new(MemoryAnalysisStore::new()), config)
}

/// Drain a subscription until its terminal event.
pub async fn collect(mut subscription: Subscription) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.next().await {
        events.push(event);
    }
    events
}

/// Store whose every operation fails.
#[derive(Debug, Default)]
pub struct UnavailableStore;

fn unavailable<T>() -> StorageResult<T> {
    Err(StorageError::Backend("connection refused".to_string()))
}

#[async_trait]
impl AnalysisStore for UnavailableStore {
    async fn create_run(&self, _record: RunRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn update_run(&self, _record: RunRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn update_stage_execution(&self, _record: StageExecutionRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn append_finding(&self, _record: FindingRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn record_quality_assessment(&self, _record: QualityRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn record_status_event(&self, _record: StatusEventRecord) -> StorageResult<()> {
        unavailable()
    }

    async fn get_run(&self, _run_id: &RunId) -> StorageResult<RunRecord> {
        unavailable()
    }

    async fn get_stage_executions(&self, _run_id: &RunId) -> StorageResult<Vec<StageExecutionRecord>> {
        unavailable()
    }

    async fn get_findings(&self, _run_id: &RunId) -> StorageResult<Vec<FindingRecord>> {
        unavailable()
    }

    async fn get_quality_assessments(&self, _run_id: &RunId) -> StorageResult<Vec<QualityRecord>> {
        unavailable()
    }

    async fn get_status_events(&self, _run_id: &RunId) -> StorageResult<Vec<StatusEventRecord>> {
        unavailable()
    }
}
