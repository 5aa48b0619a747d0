//! Chat-completions grading provider.
//!
//! Covers every OpenAI-compatible backend (DeepSeek, Moonshot, OpenAI, and
//! proxies) through one implementation: base URL, model and provider id come
//! from configuration. The model is prompted for a strict JSON grading
//! object; the assistant message content is captured verbatim as the raw
//! payload for the normalizer.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;
use crate::gateway::{CorrectionRequest, GradingProvider, RawProviderResponse};

/// Grading provider speaking the chat-completions protocol.
pub struct ChatCompletionsProvider {
    id: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionsProvider {
    /// Creates a provider for the given backend.
    pub fn new(
        id: impl Into<String>,
        api_key: String,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            // No per-request timeout here: the gateway owns the wall-clock
            // budget for the whole call.
            client: Client::new(),
            api_key,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Returns the API key masked for logging.
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GradingProvider for ChatCompletionsProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<RawProviderResponse, ProviderError> {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt(&self.id) },
                { "role": "user", "content": user_prompt(request) },
            ],
            "temperature": 0.3,
            "response_format": { "type": "json_object" },
        });

        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = extract_error_message(&text).unwrap_or(text);

            return Err(match code {
                401 | 403 => ProviderError::Auth(message),
                429 => ProviderError::RateLimited(message),
                _ => ProviderError::Api { code, message },
            });
        }

        let api_response: ChatResponse = http_response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = api_response
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("Response contained no choices".to_string())
            })?;

        let payload = serde_json::from_str(strip_code_fences(content)).map_err(|e| {
            ProviderError::MalformedResponse(format!("Grading content is not JSON: {}", e))
        })?;

        Ok(RawProviderResponse {
            provider: self.id.clone(),
            model_version: api_response.model.unwrap_or_else(|| self.model.clone()),
            payload,
            latency_ms: started.elapsed().as_millis() as u64,
            synthetic: false,
        })
    }
}

/// System prompt selecting the response schema by provider family.
fn system_prompt(provider: &str) -> &'static str {
    if provider == "deepseek" {
        "你是一位资深语文作文批改老师。请严格以 JSON 对象输出批改结果，\
         字段包括：总分（数字）、内容分、语言分、结构分、书写分、总评、\
         内容点评、语言点评、结构点评、书写点评、改进建议（字符串数组）、\
         病句修改（对象数组，含 原句、修改、说明）。不要输出 JSON 之外的任何内容。"
    } else {
        "You are an experienced essay grader. Respond with a strict JSON object \
         containing: total_score (number), content_score, language_score, \
         structure_score, writing_score, overall_comment, content_comment, \
         language_comment, structure_comment, writing_comment, \
         improvement_suggestions (array of strings), and error_corrections \
         (array of objects with original, corrected, explanation). Output \
         nothing outside the JSON object."
    }
}

fn user_prompt(request: &CorrectionRequest) -> String {
    format!(
        "Grade level: {}\nTitle: {}\n\n{}",
        request.grade, request.title, request.text
    )
}

/// Strips a leading/trailing markdown code fence if the model wrapped its
/// JSON despite instructions.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Pulls the message out of a structured API error body when present.
fn extract_error_message(body: &str) -> Option<String> {
    let parsed: ApiErrorResponse = serde_json::from_str(body).ok()?;
    Some(parsed.error.message)
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
