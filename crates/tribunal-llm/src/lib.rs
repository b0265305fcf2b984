//! Tribunal-LLM: text-generation service client
//!
//! The pipeline treats the model as an opaque, possibly slow, possibly
//! failing remote call:
//!
//! ```text
//! generate(system_prompt, messages, max_output_tokens, temperature)
//!     -> (text, input_tokens, output_tokens) | error
//! ```
//!
//! No retry logic lives here; retries belong to the caller.
//!
//! ## Layer 1 - Provider
//!
//! - [`TextGenerator`]: the service contract
//! - [`AnthropicClient`]: Messages API implementation over `reqwest`
//! - [`fakes::ScriptedGenerator`]: deterministic test double

pub mod anthropic;
mod error;
pub mod fakes;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use error::{GenerationError, GenerationResult};
pub use fakes::ScriptedGenerator;

/// Speaker of a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Input to a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// Output of a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Model identifier reported by the provider
    pub model: String,
}

impl GenerationResponse {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait every text-generation backend implements.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Perform exactly one generation call.
    async fn generate(&self, request: GenerationRequest) -> GenerationResult<GenerationResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tokens_sums_input_and_output() {
        let resp = GenerationResponse {
            text: "ok".into(),
            input_tokens: 1_200,
            output_tokens: 300,
            model: "m".into(),
        };
        assert_eq!(resp.total_tokens(), 1_500);
    }

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("hello").role, Role::Assistant);
    }
}
