//! 엔진 서비스 - 프로세스당 한 번만 엔진 생성
//!
//! 첫 요청에서 엔진을 만들고 결과(성공/실패)를 캐시합니다.
//! 실패가 캐시되면 이후 요청은 모두 `EngineUnavailable`을 받습니다.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;

use super::engine::ChatEngine;
use crate::config::RagConfig;
use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::error::{RagError, Result};
use crate::generation::GeminiGeneration;
use crate::knowledge::{open_vector_store, IndexHandle};

type EngineBuilder = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<ChatEngine>>> + Send + Sync>;

/// 지연 생성 + 결과 캐시
pub struct EngineService {
    builder: EngineBuilder,
    engine: OnceCell<std::result::Result<Arc<ChatEngine>, String>>,
}

impl EngineService {
    pub fn new<F, Fut>(builder: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<ChatEngine>>> + Send + 'static,
    {
        Self {
            builder: Box::new(move || builder().boxed()),
            engine: OnceCell::new(),
        }
    }

    /// 설정 기반 서비스 (Gemini + 설정된 벡터 저장소)
    pub fn from_config(config: RagConfig) -> Self {
        let config = Arc::new(config);
        Self::new(move || {
            let config = config.clone();
            async move { build_engine(&config).await }
        })
    }

    /// 엔진 반환 (첫 호출에서 생성)
    ///
    /// 동시에 호출해도 생성은 한 번만 실행됩니다.
    pub async fn get(&self) -> Result<Arc<ChatEngine>> {
        let cached = self
            .engine
            .get_or_init(|| async {
                match (self.builder)().await {
                    Ok(engine) => {
                        tracing::info!("Chat engine ready");
                        Ok(engine)
                    }
                    Err(e) => {
                        tracing::error!("Failed to build chat engine: {}", e);
                        Err(e.to_string())
                    }
                }
            })
            .await;

        cached.clone().map_err(RagError::EngineUnavailable)
    }

    /// 생성 성공 여부 (아직 시도 전이면 false)
    pub fn is_ready(&self) -> bool {
        matches!(self.engine.get(), Some(Ok(_)))
    }
}

/// 설정으로 엔진 생성
///
/// 인덱스를 새로 만들지 않습니다. 매니페스트가 없거나 저장소에 연결할 수 없으면
/// `IndexUnavailable`.
pub async fn build_engine(config: &RagConfig) -> Result<Arc<ChatEngine>> {
    config.validate_for_query()?;

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::from_config(&config.models, &config.http)?);

    let store = open_vector_store(config).await.map_err(|e| match e {
        RagError::Configuration(_) => e,
        other => RagError::index_unavailable(other.to_string()),
    })?;

    let handle = IndexHandle::load(&config.paths.manifest_path(), embedder, store).await?;

    let retriever = handle
        .as_retriever(config.chat.similarity_top_k)
        .with_similarity_cutoff(config.chat.similarity_cutoff);
    let generator = Arc::new(GeminiGeneration::from_config(&config.models, &config.http)?);

    Ok(Arc::new(ChatEngine::new(
        retriever,
        generator,
        config.chat.clone(),
    )))
}
