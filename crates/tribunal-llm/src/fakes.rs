//! Scripted text generator (testing only)
//!
//! `ScriptedGenerator` replays a queue of canned outcomes in order and
//! records every request it receives, so tests can assert on prompts and
//! drive failure paths deterministically.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GenerationError, GenerationResult};
use crate::{GenerationRequest, GenerationResponse, TextGenerator};

#[derive(Debug)]
struct Step {
    outcome: GenerationResult<GenerationResponse>,
    delay: Option<Duration>,
}

/// Generator that answers from a pre-loaded script.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response with explicit token usage.
    pub fn push_text(&self, text: impl Into<String>, input_tokens: u64, output_tokens: u64) {
        self.push(Ok(GenerationResponse {
            text: text.into(),
            input_tokens,
            output_tokens,
            model: "scripted".to_string(),
        }));
    }

    /// Queue an error.
    pub fn push_error(&self, error: GenerationError) {
        self.push(Err(error));
    }

    /// Queue a successful response that only resolves after `delay`.
    pub fn push_delayed_text(
        &self,
        delay: Duration,
        text: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(Step {
            outcome: Ok(GenerationResponse {
                text: text.into(),
                input_tokens,
                output_tokens,
                model: "scripted".to_string(),
            }),
            delay: Some(delay),
        });
    }

    fn push(&self, outcome: GenerationResult<GenerationResponse>) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(Step {
            outcome,
            delay: None,
        });
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of queued outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> GenerationResult<GenerationResponse> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        let step = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match step {
            Some(step) => {
                if let Some(delay) = step.delay {
                    tokio::time::sleep(delay).await;
                }
                step.outcome
            }
            None => Err(GenerationError::Exhausted),
        }
    }
}
