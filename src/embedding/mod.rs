//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더입니다.
//! 같은 모델과 같은 텍스트는 항상 같은 벡터를 만들어야 하며,
//! 실패는 `RagError::Embedding`으로 보고하고 자동 재시도하지 않습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = MiniLmEmbedding::load(&config.embedding.model_dir, 384)?;
//! let embedding = embedder.embed("Minimum GPA is 3.0").await?;
//! ```

mod gemini;
mod local;
mod minilm;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::Result;

pub use gemini::{has_gemini_key, GeminiEmbedding, GEMINI_KEY_VARS};
pub use local::HashEmbedding;
pub use minilm::{MiniLmEmbedding, MINILM_MODEL};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (입력 순서 유지, 기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Local => {
            Arc::new(MiniLmEmbedding::load(&config.model_dir, config.dimension)?)
        }
        EmbeddingBackend::Hash => Arc::new(HashEmbedding::new(config.dimension)?),
        EmbeddingBackend::Gemini => Arc::new(GeminiEmbedding::from_env(config.dimension)?),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

/// L2 정규화 (영벡터는 그대로)
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

// ============================================================================
// Tests
// ============================================================================
