//! campus-rag - 기관 문서 기반 RAG 질의응답
//!
//! PDF 문서를 청크로 나누어 임베딩하고 LanceDB에 색인한 뒤,
//! 질의와 유사한 청크를 컨텍스트로 LLM 답변을 생성합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;
pub mod pipeline;

// Re-exports
pub use config::{FailurePolicy, RagConfig};
pub use embedding::{
    create_embedder, EmbeddingProvider, GeminiEmbedding, HashEmbedding, MiniLmEmbedding,
};
pub use error::{RagError, Result};
pub use extractor::{load_document, RawDocument};
pub use generation::{AnswerGenerator, ChatCompletionClient, GenerationService, QueryResult};
pub use knowledge::{
    Chunk, ChunkConfig, ChunkMetadata, Chunker, DocumentChunker, Indexer, IngestReport,
    LanceIndex, MemoryIndex, ProgramCategory, RecursiveChunker, RetrievedChunk, Retriever,
    VectorIndex,
};
pub use pipeline::RagPipeline;
