//! 에러 타입
//!
//! 파이프라인 단계별로 구분 가능한 에러 종류를 정의합니다.
//! 수집(ingestion) 단계 에러와 질의(query) 단계 에러를 호출자가 구분하여
//! 재시도/건너뛰기 정책을 결정할 수 있도록 합니다.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 원본 파일이 존재하지 않음
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// 허용 목록 밖의 확장자
    #[error("Unsupported format '{extension}': {}", .path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// 파일은 있으나 텍스트 추출 실패
    #[error("Failed to extract text from {}: {message}", .path.display())]
    Extraction { path: PathBuf, message: String },

    /// 잘못된 설정 (청크 크기, 벡터 차원 불일치 등)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 임베딩 모델 실패
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// 벡터 인덱스 저장/조회 실패
    #[error("Index error: {0}")]
    Index(String),

    /// 생성 서비스(LLM) 실패
    #[error("Generation service error: {0}")]
    Generation(String),

    /// 외부 호출 시간 초과
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// 호출자가 질의를 취소함
    #[error("Query cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// 차원 불일치 에러 생성
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::Config(format!(
            "vector dimension mismatch: index expects {}, got {}",
            expected, actual
        ))
    }

    /// 단일 문서에 국한된 에러인지 여부
    ///
    /// 디렉토리 수집 시 `FailurePolicy::Skip`이 건너뛸 수 있는 에러입니다.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_) | Self::UnsupportedFormat { .. } | Self::Extraction { .. }
        )
    }
}

/// 외부 호출에 타임아웃 적용
///
/// 시간 초과 시 `RagError::Timeout`을 반환합니다.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout { operation, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_errors() {
        assert!(RagError::SourceNotFound(PathBuf::from("a.pdf")).is_document_error());
        assert!(RagError::UnsupportedFormat {
            path: PathBuf::from("a.docx"),
            extension: "docx".to_string(),
        }
        .is_document_error());
        assert!(!RagError::Embedding("model".to_string()).is_document_error());
        assert!(!RagError::Cancelled.is_document_error());
    }

    #[test]
    fn test_dimension_mismatch_is_config_error() {
        let err = RagError::dimension_mismatch(384, 768);
        assert!(matches!(err, RagError::Config(_)));
        assert!(err.to_string().contains("384"));
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result: Result<()> = with_timeout("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(RagError::Timeout {
                operation: "slow call",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result() {
        let result = with_timeout("fast call", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
