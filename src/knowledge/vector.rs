//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 백엔드: Pinecone (REST) 또는 로컬 LanceDB.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunker::Node;
use crate::error::Result;
use crate::loader::DocumentMetadata;

// ============================================================================
// Types
// ============================================================================

/// 벡터 레코드 (저장용)
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// 청크 ID (같은 ID로 upsert하면 덮어씀)
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// 청크와 함께 저장되는 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    #[serde(flatten)]
    pub document: DocumentMetadata,
}

impl VectorRecord {
    pub fn from_node(node: Node, embedding: Vec<f32>) -> Self {
        Self {
            id: node.id,
            text: node.text,
            metadata: ChunkMetadata {
                document_id: node.document_id,
                chunk_index: node.chunk_index,
                start_char: node.start_char,
                end_char: node.end_char,
                document: node.metadata,
            },
            embedding,
        }
    }
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    /// 유사도 스코어 (클수록 유사)
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// 인덱스 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub dimension: Option<usize>,
    pub total_vector_count: usize,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 레코드 upsert (ID 기준 덮어쓰기). 저장된 개수 반환
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;

    /// 유사도 검색 (스코어 내림차순)
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;

    /// 인덱스 통계 (연결 확인에도 사용)
    async fn describe(&self) -> Result<IndexStats>;

    /// 매니페스트에 기록할 백엔드 설명
    fn descriptor(&self) -> String;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// L2 거리를 유사도로 변환 (1 / (1 + d))
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ContentType;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_distance_to_similarity() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert!((distance_to_similarity(1.0) - 0.5).abs() < 0.0001);
        assert!(distance_to_similarity(3.0) < distance_to_similarity(1.0));
    }

    #[test]
    fn test_chunk_metadata_is_flat_json() {
        let metadata = ChunkMetadata {
            document_id: "https://www.amu.ac.in/about".to_string(),
            chunk_index: 0,
            start_char: 0,
            end_char: 18,
            document: DocumentMetadata {
                source: "https://www.amu.ac.in/about".to_string(),
                file_name: "www.amu.ac.in_about.html".to_string(),
                file_path: None,
                content_type: ContentType::Html,
                citation: "https://www.amu.ac.in/about".to_string(),
                page: None,
                total_pages: None,
                title: Some("About".to_string()),
            },
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["citation"], "https://www.amu.ac.in/about");
        assert_eq!(value["content_type"], "text/html");

        let back: ChunkMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, metadata);
    }
}
