//! 로컬 MiniLM 임베딩
//!
//! sentence-transformers all-MiniLM-L6-v2 (BERT, 384차원)를 candle로 CPU에서 실행합니다.
//! 토큰 임베딩을 attention mask 기준으로 평균낸 뒤 L2 정규화합니다.
//!
//! 모델 디렉토리 구성:
//! - `config.json`
//! - `tokenizer.json`
//! - `model.safetensors` 또는 `pytorch_model.bin`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{Tokenizer, TruncationParams};

use super::{l2_normalize, EmbeddingProvider};
use crate::error::{RagError, Result};

/// 기본 모델 이름
pub const MINILM_MODEL: &str = "all-MiniLM-L6-v2";

/// 입력 토큰 상한 (초과분은 잘림)
const MAX_TOKENS: usize = 256;

fn embed_err<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> RagError {
    move |e| RagError::Embedding(format!("{}: {}", context, e))
}

struct Model {
    bert: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl Model {
    /// 텍스트 하나 임베딩 (블로킹)
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(embed_err("Tokenization failed"))?;

        let forward = || -> candle_core::Result<Vec<f32>> {
            let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
            let attention_mask =
                Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
            let token_type_ids = input_ids.zeros_like()?;

            let hidden = self
                .bert
                .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
            mean_pool(&hidden, &attention_mask)?.squeeze(0)?.to_vec1::<f32>()
        };

        let mut vector = forward().map_err(embed_err("MiniLM forward pass failed"))?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// MiniLM 임베딩 구현체
pub struct MiniLmEmbedding {
    model: Arc<Model>,
    dimension: usize,
}

impl MiniLmEmbedding {
    /// 모델 디렉토리에서 로드
    ///
    /// 디렉토리나 설정이 맞지 않으면 `RagError::Config`를 반환합니다.
    pub fn load(model_dir: &Path, dimension: usize) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(RagError::Config(format!(
                "Embedding model directory not found: {}. Place {} files there or set CAMPUS_RAG_MODEL_DIR",
                model_dir.display(),
                MINILM_MODEL
            )));
        }

        let config_path = model_dir.join("config.json");
        let raw = std::fs::read_to_string(&config_path).map_err(|e| {
            RagError::Config(format!("cannot read {}: {}", config_path.display(), e))
        })?;

        let hidden_size = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v["hidden_size"].as_u64())
            .ok_or_else(|| {
                RagError::Config(format!("{} has no hidden_size", config_path.display()))
            })? as usize;
        if hidden_size != dimension {
            return Err(RagError::Config(format!(
                "Model at {} produces {} dimensions, configured {}",
                model_dir.display(),
                hidden_size,
                dimension
            )));
        }

        let bert_config: BertConfig = serde_json::from_str(&raw).map_err(|e| {
            RagError::Config(format!("invalid model config {}: {}", config_path.display(), e))
        })?;

        let mut tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(embed_err("Failed to load tokenizer"))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(embed_err("Failed to configure truncation"))?;

        let device = Device::Cpu;
        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let bert =
            BertModel::load(vb, &bert_config).map_err(embed_err("Failed to build MiniLM"))?;

        tracing::info!("Loaded {} from {:?}", MINILM_MODEL, model_dir);
        Ok(Self {
            model: Arc::new(Model {
                bert,
                tokenizer,
                device,
            }),
            dimension,
        })
    }

    fn check_dimension(&self, values: Vec<f32>) -> Result<Vec<f32>> {
        if values.len() != self.dimension {
            return Err(RagError::Embedding(format!(
                "MiniLM returned {} values, expected {}",
                values.len(),
                self.dimension
            )));
        }
        Ok(values)
    }
}

#[async_trait]
impl EmbeddingProvider for MiniLmEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        // 추론은 CPU 바운드이므로 spawn_blocking 사용
        let vector = tokio::task::spawn_blocking(move || model.embed(&text))
            .await
            .map_err(embed_err("Embedding task failed"))??;
        self.check_dimension(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| model.embed(text))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(embed_err("Embedding task failed"))??;

        vectors
            .into_iter()
            .map(|v| self.check_dimension(v))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        MINILM_MODEL
    }
}

/// 가중치 로드 (safetensors 우선, 없으면 PyTorch pickle)
fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return candle_core::safetensors::load(&safetensors, device)
            .map_err(embed_err("Failed to read model.safetensors"));
    }

    let pickle: PathBuf = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        let tensors = candle_core::pickle::read_all(&pickle)
            .map_err(embed_err("Failed to read pytorch_model.bin"))?;
        return Ok(tensors.into_iter().collect());
    }

    Err(RagError::Config(format!(
        "No model weights in {} (expected model.safetensors or pytorch_model.bin)",
        model_dir.display()
    )))
}

/// mask가 1인 토큰만 평균 ([B, T, H] → [B, H])
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?;
    summed.broadcast_div(&counts)
}

// ============================================================================
// Tests
// ============================================================================
