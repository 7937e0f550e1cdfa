//! askamu-rag - 기관 문서(PDF + 웹) 근거 기반 질의응답
//!
//! 수집: 소스 로그 → 문서 로더 → 청킹 → 임베딩 → 벡터 인덱스 (+ 매니페스트)
//! 질의: 질문 재작성 → 검색 → 근거 기반 생성 (스트리밍) → 인용

pub mod chat;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;
pub mod loader;
pub mod scraper;
pub mod source_log;

#[cfg(test)]
mod testing;

// Re-exports
pub use chat::{ChatEngine, ChatResponse, ChatSession, ChatState, EngineService, REFUSAL_MESSAGE};
pub use config::RagConfig;
pub use embedding::{EmbeddingProvider, GeminiEmbedding};
pub use error::{RagError, Result};
pub use generation::{GeminiGeneration, GenerationProvider};
pub use knowledge::{
    open_vector_store, IndexHandle, IndexManifest, Indexer, IngestReport, LanceVectorStore,
    PineconeVectorStore, RetrievedChunk, Retriever, VectorStore, WindowChunker,
};
pub use loader::{
    Document, DocumentLoader, DocumentMetadata, LoadBatch, LoadOptions, LoadReport,
};
pub use self::scraper::{ScrapedContent, WebScraper};
pub use source_log::SourceLog;
