//! Retriever - 질의 임베딩 + 벡터 검색
//!
//! 질의를 임베딩한 뒤 인덱스 검색 결과를 그대로(유사도 순) 반환합니다.
//! 재순위화는 하지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use super::vector::{RetrievedChunk, VectorIndex};
use crate::embedding::EmbeddingProvider;
use crate::error::{with_timeout, Result};

/// 기본 질의 임베딩 타임아웃
const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// 검색기
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    embed_timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    /// 질의 임베딩 타임아웃 지정
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 질의와 관련된 청크 검색
    ///
    /// `score >= min_score`인 청크를 최대 `k`개, 유사도 내림차순으로 반환합니다.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let vector = with_timeout(
            "query embedding",
            self.embed_timeout,
            self.embedder.embed(query),
        )
        .await?;

        let results = self.index.search(&vector, k, min_score).await?;

        tracing::info!(
            "Retrieved {} chunks (k={}, min_score={}) for query: {}",
            results.len(),
            k,
            min_score,
            query
        );
        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::error::RagError;
    use crate::knowledge::{chunk_document, MemoryIndex, RecursiveChunker, ChunkConfig, EmbeddedChunk};
    use crate::extractor::RawDocument;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct SlowEmbedding;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1.0])
        }

        fn dimension(&self) -> usize {
            1
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    async fn indexed(embedder: &Arc<dyn EmbeddingProvider>) -> Arc<dyn VectorIndex> {
        let doc = RawDocument::from_pages(
            PathBuf::from("/corpus/ug_brochure.pdf"),
            vec![
                "The minimum GPA for admission is 3.0".to_string(),
                "Hostel rooms are allotted by lottery".to_string(),
            ],
        );
        let chunker = RecursiveChunker::new(ChunkConfig::default()).unwrap();
        let chunks = chunk_document(&chunker, &doc, None);

        let mut entries = Vec::new();
        for chunk in chunks {
            let vector = embedder.embed(&chunk.content).await.unwrap();
            entries.push(EmbeddedChunk { chunk, vector }.into_entry());
        }

        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        index.replace_all(entries).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_page_first() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedding::new(384).unwrap());
        let index = indexed(&embedder).await;
        let retriever = Retriever::new(embedder, index);

        let results = retriever.retrieve("minimum GPA for admission", 2, -1.0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.page, 1);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_retrieve_respects_threshold() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedding::new(384).unwrap());
        let index = indexed(&embedder).await;
        let retriever = Retriever::new(embedder, index);

        let results = retriever.retrieve("minimum GPA", 5, 0.99).await.unwrap();
        assert!(results.iter().all(|r| r.score >= 0.99));
    }

    #[tokio::test]
    async fn test_retrieve_embedding_timeout() {
        let retriever = Retriever::new(Arc::new(SlowEmbedding), Arc::new(MemoryIndex::new()))
            .with_embed_timeout(Duration::from_millis(20));

        let result = retriever.retrieve("anything", 3, 0.0).await;
        assert!(matches!(result, Err(RagError::Timeout { .. })));
    }
}
