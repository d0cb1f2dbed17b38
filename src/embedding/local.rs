//! 해시 임베딩
//!
//! 단어 + 문자 트라이그램을 feature hashing으로 고정 차원에 투영합니다.
//! 의미 유사도는 없고 어휘 겹침만 반영합니다. 모델 파일 없이 동작해야 하는
//! 테스트나 오프라인 점검용입니다.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{l2_normalize, EmbeddingProvider};
use crate::error::{RagError, Result};

/// 트라이그램 가중치 (단어 가중치는 1.0)
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Feature hashing 임베딩
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Embedding(
                "hash embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// 특징 하나를 (버킷, 부호)로 해싱
    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(raw);

        let index = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    fn add(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let (index, sign) = self.bucket(feature);
        vector[index] += sign * weight;
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];

        for token in tokenize(text) {
            self.add(&mut vector, &format!("w:{}", token), 1.0);

            let padded: Vec<char> = format!("^{}$", token).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add(&mut vector, &format!("c:{}", gram), TRIGRAM_WEIGHT);
            }
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// 소문자 영숫자 토큰 ("3.0" 같은 숫자는 한 토큰으로 유지)
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

// ============================================================================
// Tests
// ============================================================================
