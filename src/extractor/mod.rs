//! 콘텐츠 추출 모듈
//!
//! 허용된 형식의 파일을 페이지 단위 텍스트(`RawDocument`)로 읽습니다.
//! - PDF 파일: pdf-extract로 텍스트 추출
//! - 텍스트 파일 (txt, md): 직접 읽기, 폼피드로 페이지 구분

pub mod pdf;

use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

// ============================================================================
// Raw Document
// ============================================================================

/// 한 페이지의 텍스트
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 페이지 번호 (1부터 시작)
    pub number: usize,
    pub text: String,
}

/// 로드된 원본 문서 (페이지 순서 유지)
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub path: PathBuf,
    pub pages: Vec<PageText>,
}

impl RawDocument {
    /// 페이지 텍스트 목록으로 생성 (번호는 1부터 부여)
    pub fn from_pages(path: PathBuf, pages: Vec<String>) -> Self {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText { number: i + 1, text })
            .collect();
        Self { path, pages }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// 지원하는 원본 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    PlainText,
}

impl SourceFormat {
    /// 확장자로 형식 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "txt" | "md" => Some(SourceFormat::PlainText),
            _ => None,
        }
    }
}

/// 파일 확장자 (소문자)
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// 확장자가 허용 목록에 있는지 확인
pub fn is_allowed(path: &Path, allowed_extensions: &[String]) -> bool {
    extension_of(path)
        .map(|ext| allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false)
}

/// 파일을 페이지 단위 문서로 로드
///
/// 파일이 없으면 `SourceNotFound`, 확장자가 허용 목록 밖이면
/// `UnsupportedFormat`을 반환합니다.
pub async fn load_document(path: &Path, allowed_extensions: &[String]) -> Result<RawDocument> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(RagError::SourceNotFound(path.to_path_buf()));
    }

    let extension = extension_of(path).unwrap_or_default();
    let format = SourceFormat::from_extension(&extension)
        .filter(|_| is_allowed(path, allowed_extensions))
        .ok_or_else(|| RagError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: extension.clone(),
        })?;

    let pages = match format {
        SourceFormat::Pdf => extract_pdf(path).await?,
        SourceFormat::PlainText => extract_text(path).await?,
    };

    tracing::debug!("Loaded {:?}: {} pages", path, pages.len());
    Ok(RawDocument::from_pages(path.to_path_buf(), pages))
}

/// 텍스트 파일에서 추출
async fn extract_text(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RagError::Extraction {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(text.split('\x0c').map(str::to_string).collect())
}

/// PDF 파일에서 추출
async fn extract_pdf(path: &Path) -> Result<Vec<String>> {
    // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&owned))
        .await
        .map_err(|e| RagError::Extraction {
            path: path.to_path_buf(),
            message: format!("extraction task failed: {}", e),
        })?
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn allow(exts: &[&str]) -> Vec<String> {
        exts.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_source_format_from_extension() {
        assert_eq!(SourceFormat::from_extension("PDF"), Some(SourceFormat::Pdf));
        assert_eq!(SourceFormat::from_extension("md"), Some(SourceFormat::PlainText));
        assert_eq!(SourceFormat::from_extension("docx"), None);
    }

    #[test]
    fn test_is_allowed_case_insensitive() {
        let allowed = allow(&["pdf"]);
        assert!(is_allowed(Path::new("/a/Brochure.PDF"), &allowed));
        assert!(!is_allowed(Path::new("/a/notes.txt"), &allowed));
        assert!(!is_allowed(Path::new("/a/README"), &allowed));
    }

    #[tokio::test]
    async fn test_missing_file_is_source_not_found() {
        let result = load_document(Path::new("/no/such/file.pdf"), &allow(&["pdf"])).await;
        assert!(matches!(result, Err(RagError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_disallowed_extension_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let result = load_document(&path, &allow(&["pdf"])).await;
        assert!(matches!(
            result,
            Err(RagError::UnsupportedFormat { ref extension, .. }) if extension == "txt"
        ));
    }

    #[tokio::test]
    async fn test_text_pages_split_on_formfeed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ug_rules.txt");
        std::fs::write(&path, "Page one text\x0cPage two text").unwrap();

        let doc = load_document(&path, &allow(&["txt"])).await.unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].number, 1);
        assert_eq!(doc.pages[1].text, "Page two text");
    }

    #[tokio::test]
    async fn test_pdf_pages_are_numbered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mtech_brochure.pdf");
        std::fs::write(
            &path,
            pdf::sample_pdf(&["Minimum GPA is 3.0", "The campus library opens at 9 am."]),
        )
        .unwrap();

        let doc = load_document(&path, &allow(&["pdf"])).await.unwrap();
        let numbers: Vec<usize> = doc.pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(doc.pages[1].text.contains("library"));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not really a pdf").unwrap();

        let result = load_document(&path, &allow(&["pdf"])).await;
        assert!(matches!(result, Err(RagError::Extraction { .. })));
    }
}
