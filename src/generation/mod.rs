//! 답변 생성 모듈
//!
//! 검색된 청크를 컨텍스트 블록으로 조립하고, 생성 서비스(LLM)를 한 번 호출한 뒤
//! 마크업을 제거하여 출처/신뢰도와 함께 `QueryResult`로 돌려줍니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let generator = AnswerGenerator::new(service, config.prompt.clone(), &config.generation);
//! let result = generator.answer("What is the minimum GPA?", &retrieved).await?;
//! ```

mod chat;

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{GenerationConfig, PromptConfig};
use crate::error::{with_timeout, RagError, Result};
use crate::knowledge::RetrievedChunk;

pub use chat::ChatCompletionClient;

// ============================================================================
// Types
// ============================================================================

/// 생성 서비스 요청
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// 질의 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    /// "파일명 (Page N)" 형식, 검색 순위 순
    pub sources: Vec<String>,
    /// 검색된 청크 중 최고 유사도 (없으면 0.0)
    pub confidence: f32,
}

// ============================================================================
// GenerationService Trait
// ============================================================================

/// 생성 서비스 트레이트
///
/// 프롬프트를 받아 평문 텍스트를 돌려주는 외부 서비스입니다. 재시도는 하지 않습니다.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// 서비스 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Context Assembly
// ============================================================================

/// 검색 결과를 컨텍스트 블록으로 조립 (순위 순, 빈 줄로 구분)
pub fn format_context(retrieved: &[RetrievedChunk]) -> String {
    retrieved
        .iter()
        .map(|r| {
            format!(
                "Source: {} (Page {}, Program: {})\n{}",
                r.metadata.file_name, r.metadata.page, r.metadata.category, r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 출처 목록 (중복 허용)
pub fn sources_of(retrieved: &[RetrievedChunk]) -> Vec<String> {
    retrieved
        .iter()
        .map(|r| format!("{} (Page {})", r.metadata.file_name, r.metadata.page))
        .collect()
}

/// 최고 유사도, 결과가 없으면 0.0
pub fn confidence_of(retrieved: &[RetrievedChunk]) -> f32 {
    retrieved
        .iter()
        .map(|r| r.score)
        .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
        .unwrap_or(0.0)
}

fn markup_tag() -> &'static Regex {
    static MARKUP_TAG: OnceLock<Regex> = OnceLock::new();
    MARKUP_TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("markup pattern is valid"))
}

/// `<tag>` 형태의 마크업 제거
pub fn strip_markup(text: &str) -> String {
    markup_tag().replace_all(text, "").into_owned()
}

// ============================================================================
// AnswerGenerator
// ============================================================================

/// 컨텍스트 조립 + 생성 호출 + 후처리
pub struct AnswerGenerator {
    service: Arc<dyn GenerationService>,
    prompt: PromptConfig,
    temperature: f32,
    max_output_tokens: u32,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(
        service: Arc<dyn GenerationService>,
        prompt: PromptConfig,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            service,
            prompt,
            temperature: generation.temperature,
            max_output_tokens: generation.max_output_tokens,
            timeout: Duration::from_secs(generation.timeout_secs),
        }
    }

    /// 생성 호출 타임아웃 지정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// 시스템 프롬프트 (페르소나, 대체 답변 지시, 학년도 명시, 컨텍스트)
    pub fn build_system_prompt(&self, context: &str) -> String {
        format!(
            "You are a helpful {institution} admission assistant. Use the following context to \
             answer the question. If you cannot find the answer in the context, respond with: \
             \"{fallback}\"\n\
             Important: Always mention that this information is for the academic year {year}.\n\n\
             Context:\n{context}",
            institution = self.prompt.institution,
            fallback = self.prompt.fallback_answer,
            year = self.prompt.academic_year,
            context = context,
        )
    }

    /// 생성 요청 조립
    pub fn build_request(&self, query: &str, retrieved: &[RetrievedChunk]) -> GenerationRequest {
        GenerationRequest {
            system_prompt: self.build_system_prompt(&format_context(retrieved)),
            user_message: query.to_string(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    /// 답변 생성
    ///
    /// 검색 결과가 비어 있어도 빈 컨텍스트로 호출합니다.
    pub async fn answer(&self, query: &str, retrieved: &[RetrievedChunk]) -> Result<QueryResult> {
        self.answer_with_cancel(query, retrieved, &CancellationToken::new())
            .await
    }

    /// 취소 가능한 답변 생성
    ///
    /// 토큰이 취소되면 생성 호출을 버리고 `RagError::Cancelled`를 반환합니다.
    pub async fn answer_with_cancel(
        &self,
        query: &str,
        retrieved: &[RetrievedChunk],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let request = self.build_request(query, retrieved);

        let started = Instant::now();
        let call = with_timeout("generation", self.timeout, self.service.generate(&request));
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Generation cancelled for query: {}", query);
                return Err(RagError::Cancelled);
            }
            result = call => result?,
        };
        tracing::debug!("{} responded in {:?}", self.service.name(), started.elapsed());

        Ok(QueryResult {
            answer: strip_markup(&text).trim().to_string(),
            sources: sources_of(retrieved),
            confidence: confidence_of(retrieved),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
