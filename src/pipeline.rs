//! RAG 파이프라인
//!
//! 질의: question → Retriever → AnswerGenerator → QueryResult
//! 수집: documents_dir → Indexer → VectorIndex (`reindex`)
//!
//! 모든 구성 요소는 생성자로 주입되며 전역 상태를 두지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RagConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::Result;
use crate::generation::{AnswerGenerator, ChatCompletionClient, GenerationService, QueryResult};
use crate::knowledge::{IngestReport, Indexer, LanceIndex, RetrievedChunk, Retriever, VectorIndex};

/// RAG 파이프라인
pub struct RagPipeline {
    config: RagConfig,
    retriever: Retriever,
    generator: AnswerGenerator,
    indexer: Indexer,
}

impl RagPipeline {
    /// 구성 요소를 직접 주입하여 생성
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        service: Arc<dyn GenerationService>,
    ) -> Result<Self> {
        config.validate()?;

        let retriever = Retriever::new(embedder.clone(), index.clone())
            .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs));
        let generator = AnswerGenerator::new(service, config.prompt.clone(), &config.generation);
        let indexer = Indexer::new(&config, embedder, index)?;

        Ok(Self {
            config,
            retriever,
            generator,
            indexer,
        })
    }

    /// 설정으로 생성 (LanceDB 인덱스 + 설정된 임베딩 + Chat Completions)
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = open_index(&config).await?;

        if let Some(dimension) = index.dimension().await? {
            if dimension != embedder.dimension() {
                tracing::warn!(
                    "Index dimension {} differs from {} ({}); run ingest to rebuild",
                    dimension,
                    embedder.name(),
                    embedder.dimension()
                );
            }
        }

        let service: Arc<dyn GenerationService> =
            Arc::new(ChatCompletionClient::from_config(&config.generation)?);
        tracing::info!("Using generation service: {}", service.name());

        Self::new(config, embedder, index, service)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// 검색만 수행 (설정된 k, min_score 사용)
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        self.retriever
            .retrieve(
                question,
                self.config.retrieval.k,
                self.config.retrieval.min_score,
            )
            .await
    }

    /// 질의 → 답변
    pub async fn query(&self, question: &str) -> Result<QueryResult> {
        self.query_with_cancel(question, &CancellationToken::new())
            .await
    }

    /// 취소 가능한 질의
    ///
    /// 검색이 끝난 뒤에만 컨텍스트를 조립하며, 취소는 생성 호출 지점에서 반영됩니다.
    pub async fn query_with_cancel(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let retrieved = self.retrieve(question).await?;
        tracing::debug!("Query \"{}\" retrieved {} chunks", question, retrieved.len());

        let result = self
            .generator
            .answer_with_cancel(question, &retrieved, cancel)
            .await?;

        tracing::info!(
            "Answered with {} sources (confidence {:.3})",
            result.sources.len(),
            result.confidence
        );
        Ok(result)
    }

    /// 문서 디렉토리 전체 재색인
    pub async fn reindex(&self) -> Result<IngestReport> {
        self.indexer.reindex(&self.config.documents_dir).await
    }
}

/// 설정된 경로의 LanceDB 인덱스 열기
pub async fn open_index(config: &RagConfig) -> Result<Arc<dyn VectorIndex>> {
    let index = LanceIndex::open(&config.index_dir(), &config.collection).await?;
    Ok(Arc::new(index))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::generation::GenerationRequest;
    use crate::knowledge::MemoryIndex;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 고정 어휘 축에 단어 빈도를 투영하는 임베딩
    struct KeywordEmbedding;

    const VOCABULARY: [&str; 5] = ["minimum", "gpa", "library", "campus", "opens"];

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0; VOCABULARY.len()];
            for token in text
                .split(|c: char| !c.is_alphanumeric())
                .map(str::to_lowercase)
            {
                if let Some(i) = VOCABULARY.iter().position(|w| *w == token) {
                    vector[i] += 1.0;
                }
            }
            Ok(vector)
        }

        fn dimension(&self) -> usize {
            VOCABULARY.len()
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    struct BrokenEmbedding;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::Embedding("model not loaded".to_string()))
        }

        fn dimension(&self) -> usize {
            5
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// 컨텍스트가 비면 시스템 프롬프트의 대체 답변을 그대로 따르는 스텁
    struct FixtureModel {
        fallback: String,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl FixtureModel {
        fn new(config: &RagConfig) -> Arc<Self> {
            Arc::new(Self {
                fallback: config.prompt.fallback_answer.clone(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationService for FixtureModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            if request.system_prompt.ends_with("Context:\n") {
                Ok(self.fallback.clone())
            } else {
                Ok("<p>According to the handbook, the minimum GPA is 3.0.</p>".to_string())
            }
        }

        fn name(&self) -> &str {
            "fixture"
        }
    }

    fn corpus_config(dir: &TempDir) -> RagConfig {
        let mut config = RagConfig {
            documents_dir: dir.path().to_path_buf(),
            data_dir: dir.path().join("data"),
            allowed_extensions: vec!["txt".to_string()],
            ..Default::default()
        };
        config.retrieval.k = 3;
        config.retrieval.min_score = 0.6;
        config
    }

    fn pipeline(config: &RagConfig, model: Arc<FixtureModel>) -> RagPipeline {
        RagPipeline::new(
            config.clone(),
            Arc::new(KeywordEmbedding),
            Arc::new(MemoryIndex::new()),
            model,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_finds_relevant_page() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ug_handbook.txt"),
            "Minimum GPA is 3.0\x0cThe campus library opens at 9 am.",
        )
        .unwrap();

        let config = corpus_config(&dir);
        let model = FixtureModel::new(&config);
        let pipeline = pipeline(&config, model.clone());

        let report = pipeline.reindex().await.unwrap();
        assert_eq!(report.chunks_indexed, 2);

        let retrieved = pipeline.retrieve("What is the minimum GPA?").await.unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].metadata.page, 1);
        assert_eq!(retrieved[0].content, "Minimum GPA is 3.0");

        let result = pipeline.query("What is the minimum GPA?").await.unwrap();
        assert_eq!(result.answer, "According to the handbook, the minimum GPA is 3.0.");
        assert_eq!(result.sources, vec!["ug_handbook.txt (Page 1)"]);
        assert!((result.confidence - 1.0).abs() < 1e-6);

        let requests = model.requests.lock().unwrap();
        let prompt = &requests[0].system_prompt;
        assert!(prompt.contains("Source: ug_handbook.txt (Page 1, Program: UG)\nMinimum GPA is 3.0"));
        assert!(!prompt.contains("library"));
    }

    #[tokio::test]
    async fn test_query_cites_pdf_page() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ug_brochure.pdf"),
            crate::extractor::pdf::sample_pdf(&[
                "Minimum GPA is 3.0",
                "The campus library opens at 9 am.",
            ]),
        )
        .unwrap();

        let mut config = corpus_config(&dir);
        config.allowed_extensions = vec!["pdf".to_string()];
        let pipeline = pipeline(&config, FixtureModel::new(&config));

        let report = pipeline.reindex().await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.chunks_indexed, 2);

        let retrieved = pipeline.retrieve("What is the minimum GPA?").await.unwrap();
        assert_eq!(retrieved.len(), 1);
        assert_eq!(retrieved[0].metadata.page, 1);
        assert_eq!(retrieved[0].metadata.page_count, 2);
        assert_eq!(retrieved[0].metadata.chunk_index, 0);

        let result = pipeline.query("What is the minimum GPA?").await.unwrap();
        assert_eq!(result.sources, vec!["ug_brochure.pdf (Page 1)"]);

        let library = pipeline.retrieve("When does the campus library open?").await.unwrap();
        assert_eq!(library[0].metadata.page, 2);
    }

    #[tokio::test]
    async fn test_query_on_empty_index_falls_back() {
        let dir = TempDir::new().unwrap();
        let config = corpus_config(&dir);
        let pipeline = pipeline(&config, FixtureModel::new(&config));

        let result = pipeline.query("What is the minimum GPA?").await.unwrap();

        assert_eq!(result.confidence, 0.0);
        assert!(result.sources.is_empty());
        assert!(result.answer.contains("admissions@vnit.ac.in"));
    }

    #[tokio::test]
    async fn test_long_page_yields_three_overlapping_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("general_info.txt");
        std::fs::write(&path, "abcd ".repeat(500)).unwrap();

        let config = corpus_config(&dir);
        let pipeline = pipeline(&config, FixtureModel::new(&config));

        let chunks = pipeline.indexer().preview_chunks(&path).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| !c.content.is_empty()));
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 1000));

        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].content.chars().collect();
            let next: Vec<char> = pair[1].content.chars().collect();
            assert_eq!(prev[prev.len() - 200..], next[..200]);
        }

        let report = pipeline.reindex().await.unwrap();
        assert_eq!(report.chunks_indexed, 3);
    }

    #[tokio::test]
    async fn test_cancelled_query_leaves_index_intact() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("phd.txt"), "Minimum GPA is 3.5").unwrap();

        let config = corpus_config(&dir);
        let pipeline = pipeline(&config, FixtureModel::new(&config));
        pipeline.reindex().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = pipeline.query_with_cancel("minimum GPA", &token).await;

        assert!(matches!(result, Err(RagError::Cancelled)));
        assert_eq!(pipeline.retrieve("minimum GPA").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = corpus_config(&dir);
        let pipeline = RagPipeline::new(
            config.clone(),
            Arc::new(BrokenEmbedding),
            Arc::new(MemoryIndex::new()),
            FixtureModel::new(&config),
        )
        .unwrap();

        let result = pipeline.query("minimum GPA").await;
        assert!(matches!(result, Err(RagError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reindex_runs_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Minimum GPA\x0cCampus library").unwrap();
        std::fs::write(dir.path().join("b.txt"), "Library opens early").unwrap();

        let config = corpus_config(&dir);
        let pipeline = Arc::new(pipeline(&config, FixtureModel::new(&config)));

        let runs: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { pipeline.reindex().await })
            })
            .collect();

        for run in runs {
            assert_eq!(run.await.unwrap().unwrap().chunks_indexed, 3);
        }

        let all = pipeline
            .retriever()
            .index()
            .search(&[1.0, 1.0, 1.0, 1.0, 1.0], 10, -1.0)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }
}
