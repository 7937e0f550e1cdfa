//! Retriever - 질의 임베딩 + 유사도 검색
//!
//! 인덱싱과 같은 임베딩 모델로 질의를 임베딩하고 상위 K개 청크를 반환합니다.

use std::sync::Arc;

use super::vector::{VectorMatch, VectorStore};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// 검색된 청크
pub type RetrievedChunk = VectorMatch;

impl VectorMatch {
    /// 인용 키 (PDF 파일 이름 또는 URL)
    pub fn citation(&self) -> &str {
        &self.metadata.document.citation
    }
}

/// 벡터 검색 리트리버
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    similarity_cutoff: Option<f32>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self {
            embedder,
            store,
            top_k,
            similarity_cutoff: None,
        }
    }

    /// 이 스코어 미만 결과 제외
    pub fn with_similarity_cutoff(mut self, cutoff: Option<f32>) -> Self {
        self.similarity_cutoff = cutoff;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// 기본 top_k로 검색
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.retrieve_top(query, self.top_k).await
    }

    /// 스코어 내림차순 상위 `top_k`개 반환
    ///
    /// 빈 질의는 임베딩 호출 없이 빈 결과.
    pub async fn retrieve_top(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        let embedding = self.embedder.embed_query(query).await?;
        let mut matches = self.store.query(&embedding, top_k).await?;

        // 동점은 ID 순 (안정 정렬)
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);

        if let Some(cutoff) = self.similarity_cutoff {
            matches.retain(|m| m.score >= cutoff);
        }

        tracing::debug!("Retrieved {} chunks for query: {}", matches.len(), query);
        Ok(matches)
    }
}

// ============================================================================
// Tests
// ============================================================================
