//! In-Memory Vector Index
//!
//! 현재 세대를 `RwLock<Arc<Generation>>`으로 보관합니다.
//! 쓰기는 세대 사본을 만들어 수정한 뒤 참조를 교체하므로,
//! 검색은 락을 잡은 순간의 세대 하나만 끝까지 봅니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::vector::{
    check_dimensions, cosine_similarity, rank_candidates, Candidate, IndexEntry, RetrievedChunk,
    VectorIndex,
};
use crate::error::{RagError, Result};

/// 한 세대의 인덱스 내용 (Vec 위치 = 삽입 순서)
#[derive(Debug, Clone, Default)]
struct Generation {
    number: u64,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

impl Generation {
    fn next(number: u64) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    fn apply(&mut self, entries: Vec<IndexEntry>) {
        for entry in entries {
            match self.positions.get(&entry.id) {
                Some(&pos) => self.entries[pos] = entry,
                None => {
                    self.positions.insert(entry.id.clone(), self.entries.len());
                    self.entries.push(entry);
                }
            }
        }
    }
}

/// 메모리 벡터 인덱스
#[derive(Debug, Default)]
pub struct MemoryIndex {
    current: RwLock<Arc<Generation>>,
    /// 쓰기 직렬화
    writer: Mutex<()>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 세대 번호
    pub fn generation(&self) -> Result<u64> {
        Ok(self.snapshot()?.number)
    }

    fn snapshot(&self) -> Result<Arc<Generation>> {
        self.current
            .read()
            .map(|g| Arc::clone(&g))
            .map_err(|_| RagError::Index("memory index lock poisoned".to_string()))
    }

    fn publish(&self, generation: Generation) -> Result<()> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| RagError::Index("memory index lock poisoned".to_string()))?;
        *guard = Arc::new(generation);
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        let _writer = self.writer.lock().await;

        let mut next = (*self.snapshot()?).clone();
        next.dimension = check_dimensions(next.dimension, &entries)?;

        let count = entries.len();
        next.apply(entries);
        self.publish(next)?;

        Ok(count)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let generation = self.snapshot()?;

        let Some(dimension) = generation.dimension else {
            return Ok(vec![]);
        };
        if query.len() != dimension {
            return Err(RagError::dimension_mismatch(dimension, query.len()));
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let candidates = generation
            .entries
            .iter()
            .enumerate()
            .map(|(seq, entry)| Candidate {
                seq: seq as u64,
                chunk: RetrievedChunk {
                    content: entry.content.clone(),
                    metadata: entry.metadata.clone(),
                    score: cosine_similarity(query, &entry.vector),
                },
            })
            .collect();

        Ok(rank_candidates(candidates, k, min_score))
    }

    async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let number = self.snapshot()?.number + 1;
        self.publish(Generation::next(number))
    }

    async fn replace_all(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        let _writer = self.writer.lock().await;

        let mut next = Generation::next(self.snapshot()?.number + 1);
        next.dimension = check_dimensions(None, &entries)?;
        next.apply(entries);

        let count = next.entries.len();
        self.publish(next)?;
        Ok(count)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.snapshot()?.entries.len())
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.snapshot()?.dimension)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
