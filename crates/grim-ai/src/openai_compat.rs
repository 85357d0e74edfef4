use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
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
/// Public struct `OpenAiCompatConfig` used across grim components.
pub struct OpenAiCompatConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_jitter: bool,
}

/// Client for the OpenAI-compatible `chat/completions` dialect; DeepSeek
/// speaks this shape with bearer authentication.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|error| AiError::InvalidResponse(format!("invalid API key: {error}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError> {
        let body = build_chat_completions_body(request);
        let url = self.chat_completions_url();
        let started = Instant::now();

        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .post(&url)
                .header("x-grim-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        let (text, usage) = parse_chat_completions(&raw)?;
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
                        tracing::debug!(status = status.as_u16(), delay, "chat completions retry");
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

fn build_chat_completions_body(request: &CompletionRequest) -> Value {
    let mut messages = Vec::new();
    if !request.system_prompt.trim().is_empty() {
        messages.push(json!({ "role": "system", "content": request.system_prompt }));
    }
    messages.push(json!({ "role": "user", "content": request.user_prompt }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

fn parse_chat_completions(raw: &str) -> Result<(String, TokenUsage), AiError> {
    let parsed: ChatCompletionsResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .and_then(|mut choices| choices.drain(..).next())
        .ok_or_else(|| AiError::InvalidResponse("response contained no choices".to_string()))?;

    let text = choice
        .message
        .and_then(|message| message.content)
        .unwrap_or_default();

    let usage = parsed
        .usage
        .map(|usage| TokenUsage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
            total_tokens: usage.total_tokens.unwrap_or(0),
        })
        .unwrap_or_default();

    Ok((text, usage))
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Option<Vec<ChatCompletionsChoice>>,
    usage: Option<ChatCompletionsUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsChoice {
    message: Option<ChatCompletionsMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::{build_chat_completions_body, parse_chat_completions};
    use crate::CompletionRequest;

    #[test]
    fn unit_body_places_system_and_user_messages_in_order() {
        let request = CompletionRequest {
            model: "deepseek-chat".to_string(),
            system_prompt: "You are the storyteller.".to_string(),
            user_prompt: "Adjudicate the monk protection.".to_string(),
            max_tokens: Some(2048),
            temperature: Some(0.7),
        };
        let body = build_chat_completions_body(&request);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn unit_body_skips_system_message_when_empty() {
        let request = CompletionRequest {
            model: "deepseek-chat".to_string(),
            system_prompt: "  ".to_string(),
            user_prompt: "hello".to_string(),
            max_tokens: None,
            temperature: None,
        };
        let body = build_chat_completions_body(&request);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn functional_parse_reads_first_choice_and_usage() {
        let raw = r#"{
            "choices": [{ "message": { "content": "The player survives." } }],
            "usage": { "prompt_tokens": 20, "completion_tokens": 6, "total_tokens": 26 }
        }"#;
        let (text, usage) = parse_chat_completions(raw).expect("response parses");
        assert_eq!(text, "The player survives.");
        assert_eq!(usage.total_tokens, 26);
    }

    #[test]
    fn regression_missing_choices_is_an_invalid_response() {
        let error =
            parse_chat_completions(r#"{"choices": []}"#).expect_err("empty choices should fail");
        assert!(error.to_string().contains("no choices"));
    }
}
