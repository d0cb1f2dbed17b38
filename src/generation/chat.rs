//! OpenAI 호환 Chat Completions 클라이언트
//!
//! 기본값은 Groq 엔드포인트입니다.
//! source: https://console.groq.com/docs/api-reference#chat-create

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, GenerationService};
use crate::config::{read_api_key, GenerationConfig};
use crate::error::{RagError, Result};

/// Chat Completions 클라이언트
#[derive(Debug)]
pub struct ChatCompletionClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(endpoint: String, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            model,
            api_key,
            client,
        })
    }

    /// 설정으로 생성 (API 키는 `api_key_env` 환경변수에서 읽음)
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = read_api_key(&[config.api_key_env.as_str()]).ok_or_else(|| {
            RagError::Config(format!(
                "API key not found. Set {} environment variable.",
                config.api_key_env
            ))
        })?;

        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn to_body(&self, request: &GenerationRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_message.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// 응답 본문에서 첫 번째 답변 추출
fn parse_completion(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| RagError::Generation(format!("Failed to parse completion: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| RagError::Generation("Empty response from generation service".to_string()))
}

#[async_trait]
impl GenerationService for ChatCompletionClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.to_body(request))
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::Generation(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(RagError::Generation(format!("API error {}: {}", status, body)));
        }

        let content = parse_completion(&body)?;
        tracing::debug!("{} returned {} chars", self.model, content.len());
        Ok(content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ChatCompletionClient {
        ChatCompletionClient::new(
            "http://localhost:9/v1/chat/completions".to_string(),
            "test-model".to_string(),
            "fake_key".to_string(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_request_body() {
        let request = GenerationRequest {
            system_prompt: "system text".to_string(),
            user_message: "What is the fee?".to_string(),
            temperature: 0.1,
            max_output_tokens: 1024,
        };

        let json = serde_json::to_value(client().to_body(&request)).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "system text");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 1024);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Fees are listed on page 4."}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Fees are listed on page 4.");
    }

    #[test]
    fn test_parse_empty_completion() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(RagError::Generation(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices":[{"message":{"content":"  "}}]}"#),
            Err(RagError::Generation(_))
        ));
        assert!(matches!(parse_completion("<html>"), Err(RagError::Generation(_))));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = GenerationConfig {
            api_key_env: "CAMPUS_RAG_TEST_SURELY_UNSET_GROQ_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ChatCompletionClient::from_config(&config),
            Err(RagError::Config(_))
        ));
    }
}
