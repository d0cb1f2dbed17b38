//! CLI 모듈
//!
//! campus-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectorConfig, FileCollector};
use crate::config::{read_api_key, EmbeddingBackend, RagConfig};
use crate::embedding::{create_embedder, has_gemini_key};
use crate::knowledge::{DocumentChunker, Indexer, Retriever};
use crate::pipeline::{open_index, RagPipeline};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "campus-rag")]
#[command(version, about = "기관 문서 기반 RAG 질의응답", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 폴더 전체 재색인
    Ingest {
        /// 문서 폴더 (기본: 설정의 documents_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 질문에 답변
    Query {
        /// 질문
        question: String,

        /// 검색할 최대 청크 수
        #[arg(short, long)]
        k: Option<usize>,

        /// 최소 유사도
        #[arg(short, long)]
        min_score: Option<f32>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 검색만 수행 (답변 생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        #[arg(short, long)]
        k: Option<usize>,

        #[arg(short, long)]
        min_score: Option<f32>,
    },

    /// 문서 청킹 결과 미리보기
    Chunks {
        /// 문서 파일 경로
        file: PathBuf,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest { dir } => cmd_ingest(config, dir).await,
        Commands::Query {
            question,
            k,
            min_score,
            json,
        } => cmd_query(with_retrieval(config, k, min_score), &question, json).await,
        Commands::Search {
            query,
            k,
            min_score,
        } => cmd_search(with_retrieval(config, k, min_score), &query).await,
        Commands::Chunks { file } => cmd_chunks(config, &file).await,
        Commands::Status => cmd_status(config).await,
    }
}

/// 명령행 검색 옵션 반영
fn with_retrieval(mut config: RagConfig, k: Option<usize>, min_score: Option<f32>) -> RagConfig {
    if let Some(k) = k {
        config.retrieval.k = k;
    }
    if let Some(min_score) = min_score {
        config.retrieval.min_score = min_score;
    }
    config
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 재색인 명령어 (ingest)
///
/// 문서 폴더 전체를 다시 읽어 새 인덱스 세대로 교체합니다.
async fn cmd_ingest(mut config: RagConfig, dir: Option<PathBuf>) -> Result<()> {
    if let Some(dir) = dir {
        config.documents_dir = dir;
    }

    println!("[*] 재색인: {}", config.documents_dir.display());

    let embedder = create_embedder(&config.embedding).context("임베딩 초기화 실패")?;
    let index = open_index(&config).await.context("인덱스 열기 실패")?;
    let indexer = Indexer::new(&config, embedder, index.clone())?;

    let report = indexer
        .reindex(&config.documents_dir)
        .await
        .context("재색인 실패")?;

    println!(
        "[OK] 완료: 파일 {}, 청크 {}",
        report.files_indexed, report.chunks_indexed
    );

    if !report.skipped.is_empty() {
        println!("[!] 건너뛴 파일 {} 개:", report.skipped.len());
        for failure in &report.skipped {
            println!("    {}: {}", failure.path.display(), failure.error);
        }
    }

    println!("     인덱스: {} 엔트리", index.count().await?);
    Ok(())
}

/// 질의 명령어 (query)
///
/// Ctrl-C를 누르면 생성 호출을 취소합니다.
async fn cmd_query(config: RagConfig, question: &str, json: bool) -> Result<()> {
    let pipeline = RagPipeline::from_config(config)
        .await
        .context("파이프라인 초기화 실패")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if !json {
        println!("[*] 질의 중: \"{}\"", question);
    }

    let result = pipeline
        .query_with_cancel(question, &cancel)
        .await
        .context("질의 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!("{}", result.answer);
    println!();
    println!("[*] 신뢰도: {:.3}", result.confidence);

    if result.sources.is_empty() {
        println!("[!] 관련 문서를 찾지 못했습니다.");
    } else {
        println!("[*] 출처:");
        for source in &result.sources {
            println!("    - {}", source);
        }
    }

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: RagConfig, query: &str) -> Result<()> {
    config.validate()?;

    let embedder = create_embedder(&config.embedding).context("임베딩 초기화 실패")?;
    let index = open_index(&config).await.context("인덱스 열기 실패")?;
    let retriever = Retriever::new(embedder, index)
        .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs));

    println!("[*] 검색 중: \"{}\"", query);

    let results = retriever
        .retrieve(query, config.retrieval.k, config.retrieval.min_score)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!(
            "\n[!] 유사도 {} 이상인 결과가 없습니다.",
            config.retrieval.min_score
        );
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] {} (Page {}, {})",
            i + 1,
            result.score,
            result.metadata.file_name,
            result.metadata.page,
            result.metadata.category
        );
        println!("   내용: {}", truncate_text(&result.content, 200));
        println!();
    }

    Ok(())
}

/// 청킹 미리보기 명령어 (chunks)
async fn cmd_chunks(config: RagConfig, file: &Path) -> Result<()> {
    let chunks = DocumentChunker::from_config(&config)?
        .chunk_file(file)
        .await
        .with_context(|| format!("문서 로드 실패: {}", file.display()))?;

    if chunks.is_empty() {
        println!("[!] 추출된 텍스트가 없습니다.");
        return Ok(());
    }

    println!(
        "[OK] {} 페이지, {} 청크 (크기 {}, 오버랩 {})\n",
        chunks[0].metadata.page_count,
        chunks.len(),
        config.chunk.chunk_size,
        config.chunk.chunk_overlap
    );

    for chunk in &chunks {
        let meta = &chunk.metadata;
        println!(
            "  p{} [{}/{}] {} chars [{}]",
            meta.page,
            meta.chunk_index + 1,
            meta.chunk_count_on_page,
            chunk.content.chars().count(),
            meta.category
        );
        println!("        {}", truncate_text(&chunk.content, 80));
    }

    Ok(())
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("campus-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 컬렉션: {}", config.collection);

    // 문서 폴더
    let collector = FileCollector::new(CollectorConfig::with_extensions(
        config.allowed_extensions.clone(),
    ));
    match collector.collect_directory(&config.documents_dir) {
        Ok(files) => {
            let total: u64 = files
                .iter()
                .filter_map(|f| std::fs::metadata(f).ok())
                .map(|m| m.len())
                .sum();
            println!(
                "[OK] 문서 폴더: {} ({} 파일, {})",
                config.documents_dir.display(),
                files.len(),
                format_bytes(total as usize)
            );
        }
        Err(e) => println!("[!] 문서 폴더: {}", e),
    }

    // 임베딩
    println!(
        "[*] 임베딩: {:?} (차원 {})",
        config.embedding.provider, config.embedding.dimension
    );
    match config.embedding.provider {
        EmbeddingBackend::Local if config.embedding.model_dir.is_dir() => {
            println!("[OK] 모델: {}", config.embedding.model_dir.display());
        }
        EmbeddingBackend::Local => {
            println!("[!] 모델 없음: {}", config.embedding.model_dir.display());
            println!("    설정: export CAMPUS_RAG_MODEL_DIR=/path/to/all-MiniLM-L6-v2");
        }
        EmbeddingBackend::Gemini if !has_gemini_key() => {
            println!("[!] Gemini API 키: 미설정");
            println!("    설정: export GEMINI_API_KEY=your-key");
        }
        _ => {}
    }

    // 생성 서비스
    if read_api_key(&[config.generation.api_key_env.as_str()]).is_some() {
        println!("[OK] 생성 API 키 ({}): 설정됨", config.generation.api_key_env);
    } else {
        println!("[!] 생성 API 키 ({}): 미설정", config.generation.api_key_env);
    }
    println!("[*] 생성 모델: {}", config.generation.model);

    // 인덱스
    match open_index(&config).await {
        Ok(index) => match (index.count().await, index.dimension().await) {
            (Ok(count), Ok(dimension)) => {
                let dimension = dimension
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("[OK] 벡터 인덱스: {} 청크 (차원 {})", count, dimension);
            }
            (Err(e), _) | (_, Err(e)) => println!("[!] 인덱스 조회 실패: {}", e),
        },
        Err(e) => {
            tracing::debug!("Failed to open index: {}", e);
            println!("[!] 인덱스 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::parse_from([
            "campus-rag",
            "--config",
            "rag.json",
            "query",
            "What is the hostel fee?",
            "--k",
            "3",
            "--json",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("rag.json")));
        match cli.command {
            Commands::Query {
                question, k, json, ..
            } => {
                assert_eq!(question, "What is the hostel fee?");
                assert_eq!(k, Some(3));
                assert!(json);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_retrieval_overrides() {
        let config = with_retrieval(RagConfig::default(), Some(8), None);
        assert_eq!(config.retrieval.k, 8);
        assert_eq!(config.retrieval.min_score, 0.6);
    }
}
