//! 설정 모듈
//!
//! JSON 설정 파일(선택) + 환경변수 오버라이드로 `RagConfig`를 구성합니다.
//! API 키는 설정 파일에 두지 않고 환경변수에서만 읽습니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::knowledge::ChunkConfig;

/// 설정 파일 경로 환경변수
pub const CONFIG_ENV: &str = "CAMPUS_RAG_CONFIG";
/// 데이터 디렉토리 오버라이드 환경변수
pub const DATA_DIR_ENV: &str = "CAMPUS_RAG_DATA_DIR";
/// 문서 디렉토리 오버라이드 환경변수
pub const DOCUMENTS_DIR_ENV: &str = "CAMPUS_RAG_DOCUMENTS_DIR";
/// 로컬 임베딩 모델 디렉토리 오버라이드 환경변수
pub const MODEL_DIR_ENV: &str = "CAMPUS_RAG_MODEL_DIR";

// ============================================================================
// Config Sections
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 최대 검색 결과 수
    pub k: usize,
    /// 최소 코사인 유사도
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            min_score: 0.6,
        }
    }
}

/// 임베딩 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// 로컬 MiniLM 모델 (CPU, 네트워크 불필요)
    Local,
    /// 해시 임베딩 (모델 파일 불필요, 의미 유사도 없음)
    Hash,
    /// Gemini 임베딩 API
    Gemini,
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    /// 벡터 차원
    pub dimension: usize,
    /// 로컬 모델 파일 디렉토리 (config.json, tokenizer.json, 가중치)
    pub model_dir: PathBuf,
    /// 호출당 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Local,
            dimension: 384,
            model_dir: get_data_dir().join("models").join("all-MiniLM-L6-v2"),
            timeout_secs: 30,
        }
    }
}

/// 생성 서비스(LLM) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI 호환 chat completions 엔드포인트
    pub endpoint: String,
    pub model: String,
    /// API 키를 읽을 환경변수 이름
    pub api_key_env: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.1,
            max_output_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

/// 시스템 프롬프트 구성 요소
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// 어시스턴트가 대표하는 기관명
    pub institution: String,
    /// 컨텍스트에 답이 없을 때 그대로 출력할 안내문
    pub fallback_answer: String,
    /// 답변에 반드시 명시할 학년도
    pub academic_year: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            institution: "VNIT (Visvesvaraya National Institute of Technology)".to_string(),
            fallback_answer: "Sorry, I don't have that information. Please contact the VNIT \
                              admission team at admissions@vnit.ac.in or visit the official \
                              website: https://vnit.ac.in"
                .to_string(),
            academic_year: "2025-26".to_string(),
        }
    }
}

/// 디렉토리 수집 중 개별 문서 실패 처리 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 경고 로그를 남기고 해당 문서만 건너뜀
    #[default]
    Skip,
    /// 첫 실패에서 전체 수집 중단
    Abort,
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 인덱스 저장 디렉토리
    pub data_dir: PathBuf,
    /// 원본 문서 디렉토리
    pub documents_dir: PathBuf,
    /// 벡터 컬렉션 이름
    pub collection: String,
    /// 수집 허용 확장자 (점 없이, 소문자)
    pub allowed_extensions: Vec<String>,
    pub chunk: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub prompt: PromptConfig,
    pub failure_policy: FailurePolicy,
    /// 동시에 처리할 파일 수
    pub ingest_concurrency: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            documents_dir: PathBuf::from("data"),
            collection: "admission_docs".to_string(),
            allowed_extensions: vec!["pdf".to_string()],
            chunk: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            prompt: PromptConfig::default(),
            failure_policy: FailurePolicy::default(),
            ingest_concurrency: 4,
        }
    }
}

impl RagConfig {
    /// 설정 로드
    ///
    /// 우선순위: 인자로 받은 파일 > `CAMPUS_RAG_CONFIG` 파일 > 기본값.
    /// 그 위에 환경변수 오버라이드를 적용한 뒤 검증합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// JSON 파일에서 읽기 (누락 필드는 기본값)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            RagError::Config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = non_empty_env(DATA_DIR_ENV) {
            tracing::debug!("Using data dir from {}", DATA_DIR_ENV);
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env(DOCUMENTS_DIR_ENV) {
            tracing::debug!("Using documents dir from {}", DOCUMENTS_DIR_ENV);
            self.documents_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env(MODEL_DIR_ENV) {
            tracing::debug!("Using embedding model dir from {}", MODEL_DIR_ENV);
            self.embedding.model_dir = PathBuf::from(dir);
        }
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;

        if self.retrieval.k == 0 {
            return Err(RagError::Config("retrieval.k must be at least 1".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(RagError::Config(format!(
                "retrieval.min_score must be within [-1, 1], got {}",
                self.retrieval.min_score
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding.dimension must be positive".to_string()));
        }
        if self.allowed_extensions.is_empty() {
            return Err(RagError::Config(
                "allowed_extensions must name at least one format".to_string(),
            ));
        }
        if self.ingest_concurrency == 0 {
            return Err(RagError::Config(
                "ingest_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// LanceDB 인덱스 경로
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 기본 데이터 디렉토리
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".campus-rag")
}

/// 환경변수 목록에서 처음으로 설정된 API 키 반환
pub fn read_api_key(vars: &[&str]) -> Option<String> {
    vars.iter().find_map(|var| {
        let key = non_empty_env(var)?;
        tracing::debug!("Using API key from {}", var);
        Some(key)
    })
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Tests
// ============================================================================
