//! Indexer - 문서 디렉토리 수집 → 청킹 → 임베딩 → 인덱스 발행
//!
//! `reindex`는 항상 전체를 다시 만들어 `replace_all`로 한 번에 발행합니다.
//! 실행은 뮤텍스로 직렬화되어 서로 다른 실행의 쓰기가 섞이지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;

use super::chunker::{chunk_document, Chunk, Chunker, RecursiveChunker};
use super::vector::{EmbeddedChunk, IndexEntry, VectorIndex};
use crate::collector::{CollectorConfig, FileCollector};
use crate::config::{FailurePolicy, RagConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{with_timeout, RagError, Result};
use crate::extractor::load_document;

// ============================================================================
// Report
// ============================================================================

/// 건너뛴 파일
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// 수집 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub skipped: Vec<FileFailure>,
}

// ============================================================================
// DocumentChunker
// ============================================================================

/// 파일 하나를 로드하여 청크로 분할 (임베딩/인덱스 없음)
pub struct DocumentChunker {
    chunker: Box<dyn Chunker>,
    allowed_extensions: Vec<String>,
    academic_year: Option<String>,
}

impl DocumentChunker {
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self {
            chunker: Box::new(RecursiveChunker::new(config.chunk.clone())?),
            allowed_extensions: config.allowed_extensions.clone(),
            academic_year: Some(config.prompt.academic_year.clone())
                .filter(|year| !year.trim().is_empty()),
        })
    }

    pub async fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        let doc = load_document(path, &self.allowed_extensions).await?;
        Ok(chunk_document(
            self.chunker.as_ref(),
            &doc,
            self.academic_year.as_deref(),
        ))
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// 인덱서
pub struct Indexer {
    collector: FileCollector,
    documents: DocumentChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    policy: FailurePolicy,
    concurrency: usize,
    embed_timeout: Duration,
    /// 실행 직렬화
    run_lock: Mutex<()>,
}

impl Indexer {
    /// 설정으로 생성
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        Ok(Self {
            collector: FileCollector::new(CollectorConfig::with_extensions(
                config.allowed_extensions.clone(),
            )),
            documents: DocumentChunker::from_config(config)?,
            embedder,
            index,
            policy: config.failure_policy,
            concurrency: config.ingest_concurrency.max(1),
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            run_lock: Mutex::new(()),
        })
    }

    /// 청킹 전략 교체
    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.documents.chunker = chunker;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// 디렉토리 전체 재색인
    ///
    /// 모든 파일을 처리한 뒤에만 새 세대를 발행하므로, 중간에 실패하면
    /// 기존 인덱스는 그대로 남습니다. 같은 입력으로 다시 실행하면 같은 결과를 냅니다.
    pub async fn reindex(&self, dir: &Path) -> Result<IngestReport> {
        let _run = self.run_lock.lock().await;

        let files = self.collector.collect_directory(dir)?;
        if files.is_empty() {
            tracing::warn!("No documents found in {:?}", dir);
        }

        let mut report = IngestReport::default();
        let mut entries: Vec<IndexEntry> = Vec::new();

        // 파일 단위 병렬 처리, 결과는 수집 순서대로
        let mut results = stream::iter(files)
            .map(|path| async move {
                let result = self.embed_file(&path).await;
                (path, result)
            })
            .buffered(self.concurrency);

        while let Some((path, result)) = results.next().await {
            match result {
                Ok(chunks) => {
                    report.files_indexed += 1;
                    report.chunks_indexed += chunks.len();
                    entries.extend(chunks.into_iter().map(EmbeddedChunk::into_entry));
                }
                Err(e) if e.is_document_error() && self.policy == FailurePolicy::Skip => {
                    tracing::warn!("Skipping {:?}: {}", path, e);
                    report.skipped.push(FileFailure {
                        path,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!("Ingestion aborted at {:?}: {}", path, e);
                    return Err(e);
                }
            }
        }

        self.index.replace_all(entries).await?;

        tracing::info!(
            "Indexed {} files ({} chunks), skipped {}",
            report.files_indexed,
            report.chunks_indexed,
            report.skipped.len()
        );
        Ok(report)
    }

    /// 파일 하나를 로드하여 청크로 분할 (인덱스에 쓰지 않음)
    pub async fn preview_chunks(&self, path: &Path) -> Result<Vec<Chunk>> {
        self.documents.chunk_file(path).await
    }

    /// 로드 → 청킹 → 임베딩
    async fn embed_file(&self, path: &Path) -> Result<Vec<EmbeddedChunk>> {
        let chunks = self.preview_chunks(path).await?;
        if chunks.is_empty() {
            tracing::warn!("No text chunks produced from {:?}", path);
            return Ok(vec![]);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = with_timeout(
            "document embedding",
            self.embed_timeout,
            self.embedder.embed_batch(&texts),
        )
        .await?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "{} returned {} vectors for {} chunks",
                self.embedder.name(),
                vectors.len(),
                chunks.len()
            )));
        }

        tracing::debug!("Embedded {:?}: {} chunks", path, chunks.len());
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::MemoryIndex;
    use tempfile::TempDir;

    fn test_config(policy: FailurePolicy) -> RagConfig {
        RagConfig {
            allowed_extensions: vec!["pdf".to_string(), "txt".to_string()],
            failure_policy: policy,
            ..Default::default()
        }
    }

    fn indexer(policy: FailurePolicy) -> (Indexer, Arc<MemoryIndex>) {
        let index = Arc::new(MemoryIndex::new());
        let indexer = Indexer::new(
            &test_config(policy),
            Arc::new(HashEmbedding::new(64).unwrap()),
            index.clone(),
        )
        .unwrap();
        (indexer, index)
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ug_rules.txt"), "Minimum GPA is 3.0\x0cFees").unwrap();
        std::fs::write(dir.path().join("ignored.docx"), "skip me").unwrap();

        let (indexer, index) = indexer(FailurePolicy::Skip);
        let first = indexer.reindex(dir.path()).await.unwrap();
        let second = indexer.reindex(dir.path()).await.unwrap();

        assert_eq!(first.files_indexed, 1);
        assert_eq!(first.chunks_indexed, 2);
        assert_eq!(second.chunks_indexed, first.chunks_indexed);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reindex_supersedes_previous_generation() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.txt");
        std::fs::write(&old, "Old hostel rules").unwrap();

        let (indexer, index) = indexer(FailurePolicy::Skip);
        indexer.reindex(dir.path()).await.unwrap();

        std::fs::remove_file(&old).unwrap();
        std::fs::write(dir.path().join("new.txt"), "New library timings").unwrap();
        indexer.reindex(dir.path()).await.unwrap();

        let query = HashEmbedding::new(64).unwrap().embed("anything").await.unwrap();
        let results = index.search(&query, 10, -1.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.file_name, "new.txt");
    }

    #[tokio::test]
    async fn test_skip_policy_records_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.pdf"), b"not really a pdf").unwrap();
        std::fs::write(dir.path().join("phd_guide.txt"), "PhD coursework details").unwrap();

        let (indexer, index) = indexer(FailurePolicy::Skip);
        let report = indexer.reindex(dir.path()).await.unwrap();

        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken.pdf"));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abort_policy_keeps_published_generation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mtech.txt"), "MTech seats").unwrap();

        let (indexer, index) = indexer(FailurePolicy::Abort);
        indexer.reindex(dir.path()).await.unwrap();
        let generation = index.generation().unwrap();

        std::fs::write(dir.path().join("broken.pdf"), b"not really a pdf").unwrap();
        let result = indexer.reindex(dir.path()).await;

        assert!(matches!(result, Err(RagError::Extraction { .. })));
        assert_eq!(index.generation().unwrap(), generation);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let (indexer, _) = indexer(FailurePolicy::Skip);
        let result = indexer.reindex(Path::new("/no/such/corpus")).await;
        assert!(matches!(result, Err(RagError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_document_chunker_matches_indexer_preview() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phd_guide.txt");
        std::fs::write(&path, "Coursework\x0cComprehensive exam").unwrap();

        let config = test_config(FailurePolicy::Skip);
        let standalone = DocumentChunker::from_config(&config)
            .unwrap()
            .chunk_file(&path)
            .await
            .unwrap();
        let (indexer, _) = indexer(FailurePolicy::Skip);
        let preview = indexer.preview_chunks(&path).await.unwrap();

        assert_eq!(standalone.len(), 2);
        assert_eq!(standalone, preview);
        assert_eq!(standalone[1].metadata.page, 2);
    }

    #[tokio::test]
    async fn test_preview_chunks_tags_academic_year() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("UG_admissions.txt");
        std::fs::write(&path, "Seat matrix").unwrap();

        let (indexer, _) = indexer(FailurePolicy::Skip);
        let chunks = indexer.preview_chunks(&path).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.academic_year.as_deref(), Some("2025-26"));
        assert_eq!(chunks[0].metadata.category.as_str(), "UG");
    }
}
