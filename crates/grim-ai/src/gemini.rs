use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_transport_error, parse_retry_after_ms, retry_delay_ms, should_retry_status,
    },
    AiError, Completion, CompletionRequest, LlmClient, TokenUsage,
};

#[derive(Debug, Clone)]
/// Public struct `GeminiConfig` used across grim components.
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_jitter: bool,
}

/// Client for the Google `generateContent` dialect; the key travels as a
/// query parameter, not a header.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        Ok(Self { client, config })
    }

    fn generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{model}:generateContent")
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError> {
        let body = build_generate_content_body(request);
        let url = self.generate_content_url(&request.model);
        let started = Instant::now();

        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .post(&url)
                .query(&[("key", self.config.api_key.as_str())])
                .header("x-grim-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        let (text, usage) = parse_generate_content(&raw)?;
                        return Ok(Completion {
                            text,
                            latency_ms: started.elapsed().as_millis() as u64,
                            usage,
                        });
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < self.config.max_retries && should_retry_status(status.as_u16()) {
                        let delay =
                            retry_delay_ms(attempt, self.config.retry_jitter, retry_after_ms);
                        tracing::debug!(status = status.as_u16(), delay, "gemini retry");
                        sleep(std::time::Duration::from_millis(delay)).await;
                        continue;
                    }
                    return Err(AiError::Status {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_transport_error(&error) {
                        let delay = retry_delay_ms(attempt, self.config.retry_jitter, None);
                        sleep(std::time::Duration::from_millis(delay)).await;
                        continue;
                    }
                    return Err(AiError::Http(error));
                }
            }
        }

        Err(AiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_generate_content_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "contents": [
            { "role": "user", "parts": [{ "text": request.user_prompt }] }
        ],
    });

    if !request.system_prompt.trim().is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{ "text": request.system_prompt }],
        });
    }

    if request.temperature.is_some() || request.max_tokens.is_some() {
        let mut generation_config = json!({});
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        body["generationConfig"] = generation_config;
    }

    body
}

fn parse_generate_content(raw: &str) -> Result<(String, TokenUsage), AiError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let candidate = parsed
        .candidates
        .and_then(|mut candidates| candidates.drain(..).next())
        .ok_or_else(|| AiError::InvalidResponse("response contained no candidates".to_string()))?;

    let text = candidate
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");

    let usage = parsed
        .usage_metadata
        .map(|usage| TokenUsage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            total_tokens: usage.total_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    Ok((text, usage))
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GenerateContentUsage>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GenerateContentContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Option<Vec<GenerateContentPart>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}
