//! Google Gemini 임베딩
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::config::read_api_key;
use crate::error::{RagError, Result};

/// Gemini 임베딩 모델
const GEMINI_MODEL: &str = "models/gemini-embedding-001";

const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

const GEMINI_BATCH_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:batchEmbedContents";

/// API 키 환경변수 (우선순위 순)
pub const GEMINI_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// batchEmbedContents 한 번에 보낼 수 있는 최대 요청 수
const MAX_BATCH_REQUESTS: usize = 100;

/// 문서/질의 모두 같은 task type을 사용해야 같은 텍스트가 같은 벡터가 됨
const TASK_TYPE: &str = "RETRIEVAL_DOCUMENT";

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
}

impl GeminiEmbedding {
    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(RagError::Config(format!(
                "Invalid Gemini dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            dimension,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    ///
    /// 우선순위: GEMINI_API_KEY > GOOGLE_AI_API_KEY
    pub fn from_env(dimension: usize) -> Result<Self> {
        let api_key = read_api_key(GEMINI_KEY_VARS).ok_or_else(|| {
            RagError::Config(
                "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable."
                    .to_string(),
            )
        })?;
        Self::with_dimension(api_key, dimension)
    }

    fn request_for(&self, text: &str) -> EmbedRequest {
        EmbedRequest {
            model: GEMINI_MODEL.to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: TASK_TYPE.to_string(),
            output_dimensionality: Some(self.dimension),
        }
    }

    /// 텍스트 목록을 API 한도 이하의 배치 요청들로 분할 (순서 유지)
    fn batch_requests(&self, texts: &[String]) -> Vec<BatchEmbedRequest> {
        texts
            .chunks(MAX_BATCH_REQUESTS)
            .map(|batch| BatchEmbedRequest {
                requests: batch.iter().map(|t| self.request_for(t)).collect(),
            })
            .collect()
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &Req,
    ) -> Result<Resp> {
        // API 키는 URL이 아닌 헤더로 전송
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to send embedding request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                return Err(RagError::Embedding(format!(
                    "Gemini API error ({}): {}",
                    error.error.status, error.error.message
                )));
            }
            return Err(RagError::Embedding(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| RagError::Embedding(format!("Failed to parse embedding response: {}", e)))
    }

    fn check_dimension(&self, values: Vec<f32>) -> Result<Vec<f32>> {
        if values.len() != self.dimension {
            return Err(RagError::Embedding(format!(
                "Gemini returned {} values, expected {}",
                values.len(),
                self.dimension
            )));
        }
        Ok(values)
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트는 API 호출 없이 영벡터
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let response: EmbedResponse = self.post(GEMINI_EMBED_URL, &self.request_for(text)).await?;
        self.check_dimension(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for request in self.batch_requests(texts) {
            let expected = request.requests.len();
            let response: BatchEmbedResponse = self.post(GEMINI_BATCH_URL, &request).await?;

            if response.embeddings.len() != expected {
                return Err(RagError::Embedding(format!(
                    "Gemini returned {} embeddings for {} texts",
                    response.embeddings.len(),
                    expected
                )));
            }

            for embedding in response.embeddings {
                vectors.push(self.check_dimension(embedding.values)?);
            }
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

/// Gemini API 키 존재 여부 확인
pub fn has_gemini_key() -> bool {
    read_api_key(GEMINI_KEY_VARS).is_some()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dimension() {
        let result = GeminiEmbedding::with_dimension("fake_key".to_string(), 999);
        assert!(matches!(result, Err(RagError::Config(ref m)) if m.contains("Invalid Gemini dimension")));
    }

    #[test]
    fn test_valid_dimensions() {
        for dim in [768, 1536, 3072] {
            assert!(GeminiEmbedding::with_dimension("fake_key".to_string(), dim).is_ok());
        }
    }

    #[tokio::test]
    async fn test_empty_text_skips_api() {
        let embedder = GeminiEmbedding::with_dimension("fake_key".to_string(), 768).unwrap();
        let v = embedder.embed("   ").await.unwrap();
        assert_eq!(v.len(), 768);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_request_serialization() {
        let embedder = GeminiEmbedding::with_dimension("fake_key".to_string(), 768).unwrap();
        let json = serde_json::to_value(embedder.request_for("fees")).unwrap();
        assert_eq!(json["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(json["outputDimensionality"], 768);
        assert_eq!(json["content"]["parts"][0]["text"], "fees");
    }

    #[test]
    fn test_batch_requests_respect_api_limit() {
        let embedder = GeminiEmbedding::with_dimension("fake_key".to_string(), 768).unwrap();
        let texts: Vec<String> = (0..250).map(|i| format!("chunk {}", i)).collect();

        let batches = embedder.batch_requests(&texts);
        let sizes: Vec<usize> = batches.iter().map(|b| b.requests.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let order: Vec<&str> = batches
            .iter()
            .flat_map(|b| b.requests.iter())
            .map(|r| r.content.parts[0].text.as_str())
            .collect();
        let expected: Vec<&str> = texts.iter().map(String::as_str).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_no_batches_for_no_texts() {
        let embedder = GeminiEmbedding::with_dimension("fake_key".to_string(), 768).unwrap();
        assert!(embedder.batch_requests(&[]).is_empty());
    }
}
