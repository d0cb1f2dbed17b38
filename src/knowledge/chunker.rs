//! Text Chunking Module
//!
//! 페이지 텍스트를 경계 인식 방식으로 분할합니다.
//! 문단 → 문장 → 줄 → 단어 경계 순으로 분할 지점을 찾고,
//! 깨끗한 경계가 없을 때만 문자 단위로 자릅니다.
//! 인접 청크는 정확히 `chunk_overlap` 문자만큼 겹칩니다.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::extractor::RawDocument;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (문자 수 기준)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 최대 청크 크기
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 크기 (`chunk_size`보다 작아야 함)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// 오버랩 없는 설정
    pub fn without_overlap(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunk Types
// ============================================================================

/// 문서가 속한 프로그램 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramCategory {
    #[serde(rename = "UG")]
    Ug,
    MTech,
    PhD,
    General,
}

/// 파일명 패턴 (우선순위 순)
const CATEGORY_PATTERNS: &[(ProgramCategory, &[&str])] = &[
    (ProgramCategory::Ug, &["ug", "undergraduate"]),
    (ProgramCategory::MTech, &["mtech"]),
    (ProgramCategory::PhD, &["phd"]),
];

impl ProgramCategory {
    /// 파일명으로 분류 추론 (대소문자 무시 부분 문자열 매칭)
    pub fn from_file_name(file_name: &str) -> Self {
        let lower = file_name.to_lowercase();
        CATEGORY_PATTERNS
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
            .map(|(category, _)| *category)
            .unwrap_or(ProgramCategory::General)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramCategory::Ug => "UG",
            ProgramCategory::MTech => "MTech",
            ProgramCategory::PhD => "PhD",
            ProgramCategory::General => "General",
        }
    }
}

impl std::fmt::Display for ProgramCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 청크 출처 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 원본 파일 경로
    pub source: String,
    /// 파일 이름 (출처 표기용)
    pub file_name: String,
    /// 페이지 번호 (1부터 시작, PDF 뷰어 표기와 동일)
    ///
    /// 0-based 페이지 인덱스보다 1 큽니다.
    pub page: usize,
    /// 문서 총 페이지 수
    pub page_count: usize,
    /// 페이지 내 청크 인덱스 (0-based)
    pub chunk_index: usize,
    /// 페이지 내 청크 수
    pub chunk_count_on_page: usize,
    pub category: ProgramCategory,
    /// 문서가 적용되는 학년도
    #[serde(default)]
    pub academic_year: Option<String>,
}

/// 출처 정보가 붙은 텍스트 조각
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 분할 경계 종류 (선호 순)
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Sentence,
    Line,
    Word,
}

const BOUNDARY_PREFERENCE: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Sentence,
    Boundary::Line,
    Boundary::Word,
];

impl Boundary {
    /// `chars[pos - 1]`과 `chars[pos]` 사이가 이 종류의 경계인지
    fn matches(self, chars: &[char], pos: usize) -> bool {
        if pos == 0 || pos > chars.len() {
            return false;
        }
        let prev = chars[pos - 1];
        match self {
            Boundary::Paragraph => prev == '\n' && pos >= 2 && chars[pos - 2] == '\n',
            Boundary::Sentence => {
                prev.is_whitespace() && pos >= 2 && matches!(chars[pos - 2], '.' | '!' | '?')
            }
            Boundary::Line => prev == '\n',
            Boundary::Word => prev.is_whitespace(),
        }
    }
}

/// 경계 탐색 재귀 분할 청커
///
/// 각 청크는 최대 `chunk_size` 문자이며, 다음 청크는 이전 청크의
/// 마지막 `chunk_overlap` 문자로 시작합니다.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkConfig,
}

impl RecursiveChunker {
    /// 설정으로 생성 (오버랩 >= 크기면 `RagError::Config`)
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 문자 인덱스 범위로 분할
    fn split_ranges(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let total = chars.len();

        let mut ranges = Vec::new();
        if total == 0 {
            return ranges;
        }

        let mut start = 0;
        loop {
            if total - start <= size {
                ranges.push((start, total));
                break;
            }

            let end = self.find_break(chars, start);
            ranges.push((start, end));
            start = end - overlap;
        }

        ranges
    }

    /// `start`에서 시작하는 청크의 끝 위치 탐색
    ///
    /// 너무 짧은 청크를 피하기 위해 윈도우 후반부에서만 경계를 찾습니다.
    /// 끝 위치는 항상 `start + overlap`보다 커서 진행이 보장됩니다.
    fn find_break(&self, chars: &[char], start: usize) -> usize {
        let size = self.config.chunk_size;
        let limit = start + size;
        let min_end = start + (self.config.chunk_overlap + 1).max(size / 2);

        for boundary in BOUNDARY_PREFERENCE {
            if let Some(pos) = (min_end..=limit).rev().find(|&p| boundary.matches(chars, p)) {
                return pos;
            }
        }

        // 깨끗한 경계 없음 - 문자 단위로 자름
        limit
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return vec![];
        }

        let chars: Vec<char> = trimmed.chars().collect();
        self.split_ranges(&chars)
            .into_iter()
            .map(|(start, end)| chars[start..end].iter().collect())
            .collect()
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Document Chunking
// ============================================================================

/// 문서의 모든 페이지를 청크로 분할
///
/// 청크는 페이지 순서, 페이지 내 순서대로 반환됩니다.
pub fn chunk_document(
    chunker: &dyn Chunker,
    doc: &RawDocument,
    academic_year: Option<&str>,
) -> Vec<Chunk> {
    let source = doc.path.display().to_string();
    let file_name = file_name_of(&doc.path);
    let category = ProgramCategory::from_file_name(&file_name);
    let page_count = doc.pages.len();

    let mut chunks = Vec::new();

    for page in &doc.pages {
        let pieces = chunker.chunk(&page.text);
        let chunk_count_on_page = pieces.len();

        chunks.extend(pieces.into_iter().enumerate().map(|(chunk_index, content)| Chunk {
            content,
            metadata: ChunkMetadata {
                source: source.clone(),
                file_name: file_name.clone(),
                page: page.number,
                page_count,
                chunk_index,
                chunk_count_on_page,
                category,
                academic_year: academic_year.map(str::to_string),
            },
        }));
    }

    tracing::debug!(
        "Chunked {} with {}: {} pages, {} chunks",
        file_name,
        chunker.name(),
        page_count,
        chunks.len()
    );

    chunks
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Tests
// ============================================================================
