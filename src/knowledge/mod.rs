//! Knowledge 모듈 - 청킹, 벡터 저장소, 인덱스, 검색
//!
//! - Chunker: 단어 기준 고정 창 분할 (겹침 포함)
//! - Pinecone: 기본 원격 인덱스 (REST)
//! - LanceDB: 로컬 인덱스 (오프라인 개발용)
//! - Indexer: 임베딩 + upsert + 매니페스트 기록
//! - Retriever: 질의 임베딩 + 상위 K 검색

mod chunker;
mod indexer;
mod lance;
mod pinecone;
mod retriever;
mod vector;

use std::sync::Arc;

use crate::config::{RagConfig, VectorBackend};
use crate::error::Result;

// Re-exports
pub use chunker::{chunk_id, expected_chunk_count, Node, WindowChunker};
pub use indexer::{
    BuildReport, IndexHandle, IndexManifest, Indexer, IngestReport, MANIFEST_VERSION,
};
pub use lance::LanceVectorStore;
pub use pinecone::PineconeVectorStore;
pub use retriever::{RetrievedChunk, Retriever};
pub use vector::{
    cosine_similarity, distance_to_similarity, ChunkMetadata, IndexStats, VectorMatch,
    VectorRecord, VectorStore,
};

/// 설정된 백엔드로 벡터 저장소 열기
pub async fn open_vector_store(config: &RagConfig) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.vector_store.backend {
        VectorBackend::Pinecone => Arc::new(
            PineconeVectorStore::connect(&config.vector_store, &config.http).await?,
        ),
        VectorBackend::Lance => Arc::new(
            LanceVectorStore::open(&config.paths.lance_path(), config.models.embedding_dimension)
                .await?,
        ),
    };
    tracing::info!("Vector store: {}", store.descriptor());
    Ok(store)
}
