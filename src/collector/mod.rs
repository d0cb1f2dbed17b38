//! 파일 수집 모듈
//!
//! 문서 디렉토리를 재귀 탐색하여 허용 목록의 확장자를 가진 파일만 수집합니다.
//! 허용되지 않는 파일은 조용히 건너뜁니다.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{RagError, Result};
use crate::extractor::is_allowed;

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 수집 허용 확장자
    pub extensions: Vec<String>,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["pdf".to_string()],
            include_hidden: false,
            max_file_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl CollectorConfig {
    /// 확장자 목록만 지정
    pub fn with_extensions(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            ..Default::default()
        }
    }
}

/// 파일 수집기
#[derive(Debug, Clone)]
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    /// 새 수집기 생성
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 폴더 재귀 수집
    ///
    /// 결과는 경로 순으로 정렬되어 수집 순서가 항상 같습니다.
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Err(RagError::SourceNotFound(path.to_path_buf()));
        }

        let walker = WalkBuilder::new(path)
            .hidden(!self.config.include_hidden)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build();

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            if self.should_include(entry.path()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        tracing::info!("Collected {} files from {:?}", files.len(), path);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, path: &Path) -> bool {
        if !is_allowed(path, &self.config.extensions) {
            return false;
        }

        if self.config.max_file_size > 0 {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size > self.config.max_file_size {
                tracing::debug!("Skipping large file: {:?} ({} bytes)", path, size);
                return false;
            }
        }

        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collector_config_default() {
        let config = CollectorConfig::default();
        assert_eq!(config.extensions, vec!["pdf".to_string()]);
        assert!(!config.include_hidden);
    }

    #[test]
    fn test_collects_only_allowed_sorted() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("phd");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b_rules.pdf"), "x").unwrap();
        std::fs::write(dir.path().join("a_fees.PDF"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(nested.join("ordinance.pdf"), "x").unwrap();

        let collector = FileCollector::new(CollectorConfig::default());
        let files = collector.collect_directory(dir.path()).unwrap();

        let names: Vec<String> = files
            .iter()
            .map(|p| {
                p.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["a_fees.PDF", "b_rules.pdf", "phd/ordinance.pdf"]);
    }

    #[test]
    fn test_skips_hidden_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".draft.pdf"), "x").unwrap();
        std::fs::write(dir.path().join("final.pdf"), "x").unwrap();

        let collector = FileCollector::new(CollectorConfig::default());
        let files = collector.collect_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_skips_oversized_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.pdf"), vec![b'x'; 64]).unwrap();

        let collector = FileCollector::new(CollectorConfig {
            max_file_size: 16,
            ..Default::default()
        });
        assert!(collector.collect_directory(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let collector = FileCollector::new(CollectorConfig::default());
        let result = collector.collect_directory(Path::new("/no/such/corpus"));
        assert!(matches!(result, Err(RagError::SourceNotFound(_))));
    }
}
