//! Vector Index - 벡터 검색 트레이트 및 유틸리티
//!
//! 인덱스는 "세대(generation)" 단위로 내용을 관리합니다.
//! `clear`/`replace_all`은 새 세대를 발행하며, 검색은 항상 한 세대 전체만 봅니다.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::chunker::{Chunk, ChunkMetadata};
use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 임베딩이 붙은 청크
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    /// 인덱스 엔트리로 변환 (id는 출처로부터 결정적으로 생성)
    pub fn into_entry(self) -> IndexEntry {
        IndexEntry {
            id: chunk_id(&self.chunk.metadata),
            vector: self.vector,
            content: self.chunk.content,
            metadata: self.chunk.metadata,
        }
    }
}

/// 인덱스 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// 세대 내 고유 ID
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

/// 정렬 전 검색 후보 (`seq`는 세대 내 삽입 순서)
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub seq: u64,
    pub chunk: RetrievedChunk,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// VectorIndex 트레이트 (async)
///
/// 인덱스가 유일한 쓰기 주체이며, 동시 검색은 항상 이전 세대 전체 또는
/// 새 세대 전체 중 하나만 관찰합니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 엔트리 삽입/갱신 (같은 id는 덮어쓰기, 삽입 순서는 최초 위치 유지)
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize>;

    /// 유사도 내림차순 검색 (`score >= min_score`인 것만, 최대 k개)
    async fn search(&self, query: &[f32], k: usize, min_score: f32)
        -> Result<Vec<RetrievedChunk>>;

    /// 모든 엔트리 삭제 (빈 새 세대 시작)
    async fn clear(&self) -> Result<()>;

    /// 전체 교체: 새 세대를 완성한 뒤 한 번에 발행
    async fn replace_all(&self, entries: Vec<IndexEntry>) -> Result<usize>;

    /// 현재 세대의 엔트리 수
    async fn count(&self) -> Result<usize>;

    /// 현재 세대의 벡터 차원 (첫 쓰기 전에는 None)
    async fn dimension(&self) -> Result<Option<usize>>;

    /// 백엔드 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// 청크 출처(파일, 페이지, 페이지 내 인덱스)로 결정적 ID 생성
pub fn chunk_id(metadata: &ChunkMetadata) -> String {
    let key = format!(
        "{}\u{1f}{}\u{1f}{}",
        metadata.source, metadata.page, metadata.chunk_index
    );
    let digest = Sha256::digest(key.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// 엔트리 벡터 차원 검증
///
/// 모든 엔트리가 같은 차원이어야 하며, 세대 차원이 정해져 있으면 일치해야 합니다.
/// 결정된 차원을 반환합니다.
pub(crate) fn check_dimensions(
    current: Option<usize>,
    entries: &[IndexEntry],
) -> Result<Option<usize>> {
    let mut dimension = current;

    for entry in entries {
        if entry.vector.is_empty() {
            return Err(RagError::Config(format!("entry {} has an empty vector", entry.id)));
        }
        match dimension {
            Some(expected) if expected != entry.vector.len() => {
                return Err(RagError::dimension_mismatch(expected, entry.vector.len()));
            }
            Some(_) => {}
            None => dimension = Some(entry.vector.len()),
        }
    }

    Ok(dimension)
}

/// 후보를 임계값으로 거르고 점수 내림차순, 동점은 삽입 순서로 정렬
pub(crate) fn rank_candidates(
    mut candidates: Vec<Candidate>,
    k: usize,
    min_score: f32,
) -> Vec<RetrievedChunk> {
    candidates.retain(|c| c.chunk.score.is_finite() && c.chunk.score >= min_score);
    candidates.sort_by(|a, b| {
        b.chunk
            .score
            .partial_cmp(&a.chunk.score)
            .unwrap_or(Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    candidates.truncate(k);
    candidates.into_iter().map(|c| c.chunk).collect()
}

// ============================================================================
// Tests
// ============================================================================
