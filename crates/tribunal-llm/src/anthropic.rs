//! Anthropic Messages API client
//!
//! One `POST /v1/messages` per [`TextGenerator::generate`] call. No retries,
//! no streaming.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GenerationError, GenerationResult};
use crate::{GenerationRequest, GenerationResponse, Message, TextGenerator};

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Anthropic client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key (`ANTHROPIC_API_KEY`)
    pub api_key: Option<String>,
    /// Model identifier (`TRIBUNAL_MODEL`)
    pub model: String,
    /// Endpoint override (`ANTHROPIC_BASE_URL`)
    pub base_url: Option<String>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        AnthropicConfig {
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: std::env::var("TRIBUNAL_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
        }
    }
}

impl AnthropicConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for an explicit key and model
    pub fn new(api_key: &str, model: &str) -> Self {
        AnthropicConfig {
            api_key: Some(api_key.to_string()),
            model: model.to_string(),
            base_url: None,
        }
    }

    /// Point the client at a different endpoint
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }
}

/// Anthropic Messages API client
pub struct AnthropicClient {
    config: AnthropicConfig,
    http_client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client
    pub fn new(config: AnthropicConfig) -> GenerationResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tribunal-llm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GenerationError::Network {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(AnthropicClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> GenerationResult<Self> {
        Self::new(AnthropicConfig::from_env())
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL)
    }

    fn build_request_body<'a>(&'a self, request: &'a GenerationRequest) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.config.model,
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            system: &request.system_prompt,
            messages: request.messages.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Map a non-success status into the error taxonomy.
fn parse_http_error(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    if status == 429 {
        GenerationError::RateLimited { message }
    } else {
        GenerationError::Http { status, message }
    }
}

/// Concatenate every text block of a response.
fn collect_text(response: &ApiResponse) -> String {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: GenerationRequest) -> GenerationResult<GenerationResponse> {
        let api_key =
            self.config
                .api_key
                .as_ref()
                .ok_or_else(|| GenerationError::MissingApiKey {
                    provider: "anthropic".to_string(),
                })?;

        let body = self.build_request_body(&request);
        debug!(
            model = %self.config.model,
            max_tokens = request.max_output_tokens,
            "sending generation request"
        );

        let response = self
            .http_client
            .post(self.base_url())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Network {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|e| GenerationError::Network {
            message: e.to_string(),
        })?;

        if !(200..300).contains(&status) {
            warn!(status, "generation request rejected");
            return Err(parse_http_error(status, &body_text));
        }

        let parsed: ApiResponse =
            serde_json::from_str(&body_text).map_err(|e| GenerationError::Parse {
                message: e.to_string(),
            })?;

        Ok(GenerationResponse {
            text: collect_text(&parsed),
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            model: parsed.model,
        })
    }
}
