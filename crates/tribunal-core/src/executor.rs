//! Stage executor: one attempt of one stage.
//!
//! prompt -> reserve -> generate -> extract -> score -> commit -> completed event.
//!
//! Any failure before the commit drops the reservation, so the unspent
//! budget is available to the next attempt. Retrying is the pipeline's job.

use std::sync::Arc;

use tribunal_llm::{GenerationRequest, Message, TextGenerator};
use tribunal_state::{ContentDigest, RunId};

use crate::budget::{reservation_size, BudgetLedger};
use crate::config::PipelineConfig;
use crate::domain::error::{BudgetError, StageError};
use crate::domain::event::{EventScope, EventStatus};
use crate::domain::report::{StageResult, TokenUsage};
use crate::domain::request::ValidationRequest;
use crate::domain::run::StageKind;
use crate::extract::FindingExtractor;
use crate::metrics::METRICS;
use crate::obs;
use crate::progress::ProgressReporter;
use crate::prompt::build_prompt;
use crate::quality::QualityScorer;

/// Everything an attempt reads from its run.
pub struct StageContext<'a> {
    pub run_id: &'a RunId,
    pub request: &'a ValidationRequest,
    /// Results of the stages already completed, in order.
    pub prior: &'a [StageResult],
    pub ledger: &'a BudgetLedger,
    pub progress: &'a ProgressReporter,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Render the shorter prompt used after a budget denial.
    pub compact: bool,
}

pub struct StageExecutor {
    generator: Arc<dyn TextGenerator>,
    extractor: Arc<FindingExtractor>,
    scorer: QualityScorer,
    config: Arc<PipelineConfig>,
}

impl StageExecutor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        extractor: Arc<FindingExtractor>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            generator,
            extractor,
            scorer: QualityScorer::new(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    /// Run a single attempt of `stage`.
    pub async fn execute(
        &self,
        stage: StageKind,
        ctx: &StageContext<'_>,
    ) -> Result<StageResult, StageError> {
        let scope = EventScope::from(stage);
        let settings = self.config.stage(stage);
        obs::emit_stage_started(ctx.run_id, stage, ctx.attempt, ctx.compact);
        ctx.progress
            .emit(
                scope,
                EventStatus::Processing,
                stage.progress_at(0.0),
                format!("{stage}: preparing prompt"),
                None,
            )
            .await;

        let prompt = build_prompt(stage, ctx.request, ctx.prior, ctx.compact);
        let requested = reservation_size(prompt.estimated_tokens(), settings.max_output_tokens);
        let reservation = match ctx.ledger.reserve(stage, requested) {
            Ok(reservation) => reservation,
            Err(err) => {
                if let BudgetError::BudgetExceeded {
                    requested,
                    available,
                    ..
                } = &err
                {
                    obs::emit_budget_rejected(ctx.run_id, stage, *requested, *available);
                }
                return Err(err.into());
            }
        };

        ctx.progress
            .emit(
                scope,
                EventStatus::Processing,
                stage.progress_at(0.1),
                format!("{stage}: calling model"),
                None,
            )
            .await;

        let request = GenerationRequest {
            system_prompt: prompt.system,
            messages: vec![Message::user(prompt.user)],
            max_output_tokens: settings.max_output_tokens,
            temperature: settings.temperature,
        };
        let timeout = self.config.stage_timeout();
        let response = match tokio::time::timeout(timeout, self.generator.generate(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(StageError::Generation { stage, source }),
            Err(_) => {
                return Err(StageError::Timeout {
                    stage,
                    secs: timeout.as_secs(),
                })
            }
        };
        if response.text.trim().is_empty() {
            return Err(StageError::EmptyResponse { stage });
        }
        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        let extraction = self.extractor.extract(&response.text, stage);
        if extraction.degraded {
            obs::emit_extraction_degraded(ctx.run_id, stage, response.text.chars().count());
        }
        ctx.progress
            .emit(
                scope,
                EventStatus::Processing,
                stage.progress_at(0.6),
                format!("{stage}: extracted {} findings", extraction.findings.len()),
                None,
            )
            .await;

        let quality = self.scorer.score(stage, &response.text, &extraction);
        obs::emit_quality_assessed(
            ctx.run_id,
            stage.name(),
            quality.aggregate,
            quality.standard_met,
        );
        ctx.progress
            .emit(
                scope,
                EventStatus::Processing,
                stage.progress_at(0.8),
                format!("{stage}: scored {:.2}", quality.aggregate),
                None,
            )
            .await;

        reservation.commit(usage.total())?;
        METRICS.add_tokens_committed(usage.total());

        let result = StageResult {
            stage,
            summary: extraction.summary,
            confidence: extraction.confidence,
            response_digest: ContentDigest::from_bytes(response.text.as_bytes()),
            extraction_degraded: extraction.degraded,
            verdict: extraction.verdict,
            findings: extraction.findings,
            quality,
            usage,
            response: response.text,
            attempts: ctx.attempt,
        };
        obs::emit_stage_finished(
            ctx.run_id,
            stage,
            true,
            usage.total(),
            result.findings.len(),
        );
        Ok(result)
    }
}
