//! 에러 타입 - 수집/질의 경로 공통 에러
//!
//! - 수집 단계 에러: 항목 단위로 복구 (건너뛰고 계속)
//! - 엔진 생성 에러: [`crate::chat::EngineService`]가 캐시
//! - 질의 단계 서비스 에러: 턴 단위로 복구 (다음 턴에 재시도)

use thiserror::Error;

/// 라이브러리 공통 Result 타입
pub type Result<T> = std::result::Result<T, RagError>;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 자격 증명 누락, 잘못된 파라미터, 임베딩 모델 불일치
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// PDF 폴더 또는 URL 목록 파일 없음 (해당 소스는 문서 0개로 취급)
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// 개별 PDF/URL 읽기 실패
    #[error("Failed to fetch '{source_id}': {message}")]
    Fetch { source_id: String, message: String },

    /// 매니페스트 없음 또는 벡터 저장소 연결 불가
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// 캐시된 엔진 생성 실패
    #[error("Chat engine unavailable: {0}")]
    EngineUnavailable(String),

    /// 임베딩 서비스 에러
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// 벡터 저장소 서비스 에러
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// 생성 모델 서비스 에러
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RagError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn fetch(source_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    pub fn index_unavailable(message: impl Into<String>) -> Self {
        Self::IndexUnavailable(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    /// 쿼리 경로에서 치명적인 에러인지 (엔진 사용 불가)
    pub fn is_fatal_for_query(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::IndexUnavailable(_) | Self::EngineUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_message() {
        let err = RagError::fetch("https://amu.ac.in/bad", "timeout");
        assert_eq!(
            err.to_string(),
            "Failed to fetch 'https://amu.ac.in/bad': timeout"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RagError::index_unavailable("no manifest").is_fatal_for_query());
        assert!(RagError::configuration("missing key").is_fatal_for_query());
        assert!(!RagError::generation("503").is_fatal_for_query());
        assert!(!RagError::embedding("429").is_fatal_for_query());
    }
}
