//! Knowledge 모듈 - 청킹, 벡터 인덱스, 검색
//!
//! - Chunker: 경계 인식 텍스트 분할 + 출처 메타데이터
//! - Vector: 인덱스 트레이트와 코사인 유사도
//! - Memory / Lance: 세대 교체 방식의 인덱스 구현
//! - Indexer: 디렉토리 재색인
//! - Retriever: 질의 → 관련 청크

mod chunker;
mod indexer;
mod lance;
mod memory;
mod retriever;
mod vector;

// Re-exports
pub use chunker::{
    chunk_document, Chunk, ChunkConfig, ChunkMetadata, Chunker, ProgramCategory,
    RecursiveChunker,
};
pub use indexer::{DocumentChunker, FileFailure, Indexer, IngestReport};
pub use lance::LanceIndex;
pub use memory::MemoryIndex;
pub use retriever::Retriever;
pub use vector::{
    chunk_id, cosine_similarity, EmbeddedChunk, IndexEntry, RetrievedChunk, VectorIndex,
};
