//! LLM client - HTTP client for OpenAI-compatible APIs
//!
//! Blocking reqwest client used from the analysis worker thread. The two
//! pipeline scenarios (method judge, result summarizer) both go through
//! `chat_completion`, which requests a JSON object response and parses it
//! into the scenario's typed schema.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

use super::models::{LlmError, LlmScenario};

/// LLM HTTP client
pub struct LlmClient {
    http_client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, config }
    }

    /// Call the chat completion API and parse the JSON payload into `Resp`.
    pub fn chat_completion<Resp>(
        &self,
        scenario: LlmScenario,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Resp, LlmError>
    where
        Resp: DeserializeOwned,
    {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }
        let api_key = self.config.api_key.as_ref().ok_or(LlmError::NotConfigured)?;

        let chat_request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            max_tokens: Some(1000),
            temperature: Some(0.3),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));

        tracing::debug!(
            "Calling LLM API for {}: {} with model {}",
            scenario.as_str(),
            url,
            self.config.model
        );

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_seconds)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text =
                response.text().unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))?;

        parse_json_payload(content)
    }
}

/// Extract the JSON object from a model reply and deserialize it.
///
/// Models occasionally wrap the object in prose or a code fence despite the
/// json_object response format; the outermost brace pair is authoritative.
pub fn parse_json_payload<Resp: DeserializeOwned>(content: &str) -> Result<Resp, LlmError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json_str = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => {
            return Err(LlmError::ParseError(format!(
                "No JSON object found in LLM response: {}",
                content
            )));
        },
    };

    serde_json::from_str(json_str).map_err(|e| {
        LlmError::ParseError(format!("Failed to parse LLM response: {}. Content: {}", e, json_str))
    })
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        selected_method: String,
        reasoning: String,
    }

    #[test]
    fn parses_bare_json() {
        let payload: Payload = parse_json_payload(
            r#"{"selected_method": "iptw", "reasoning": "best balance"}"#,
        )
        .unwrap();
        assert_eq!(payload.selected_method, "iptw");
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let content = "Here is my selection:\n```json\n{\"selected_method\": \"psm\", \"reasoning\": \"fine\"}\n```\nDone.";
        let payload: Payload = parse_json_payload(content).unwrap();
        assert_eq!(payload.selected_method, "psm");
    }

    #[test]
    fn rejects_prose_without_json() {
        let result: Result<Payload, _> = parse_json_payload("I would pick PSM.");
        assert!(matches!(result, Err(LlmError::ParseError(_))));
    }

    #[test]
    fn disabled_client_short_circuits() {
        let config = LlmConfig { enabled: false, ..Default::default() };
        let client = LlmClient::new(config);
        let result: Result<Payload, _> =
            client.chat_completion(LlmScenario::MethodSelection, "sys", "user");
        assert!(matches!(result, Err(LlmError::Disabled)));
    }

    #[test]
    fn missing_key_short_circuits() {
        let config = LlmConfig { enabled: true, api_key: None, ..Default::default() };
        let client = LlmClient::new(config);
        let result: Result<Payload, _> =
            client.chat_completion(LlmScenario::MethodSelection, "sys", "user");
        assert!(matches!(result, Err(LlmError::NotConfigured)));
    }
}
