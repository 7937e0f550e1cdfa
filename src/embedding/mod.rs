//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 인덱싱과 질의는 반드시 같은 모델을 사용해야 합니다.
//! 모델 ID는 인덱스 매니페스트에 기록되어 로드 시 검증됩니다.
//!
//! 재시도는 하지 않습니다. 실패는 호출자에게 그대로 전달됩니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_config(&config.models, &config.http)?;
//! let embedding = embedder.embed_query("When was AMU founded?").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{HttpConfig, ModelConfig};
use crate::error::{RagError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서(청크) 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 질의 임베딩 (기본 구현: 문서와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 모델 ID (매니페스트에 기록)
    fn model_id(&self) -> &str;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini API 베이스 URL
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Option<Arc<Mutex<RateLimiter>>>,
}

/// 분당 요청 수 제한 (대기만 하고 재시도하지 않음)
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn per_minute(max_requests: u32) -> Self {
        let window = Duration::from_secs(60);
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: window / max_requests.max(1),
            last_request: None,
        }
    }

    /// 요청 가능할 때까지 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. 제한 초과 시 가장 오래된 요청이 윈도우를 벗어날 때까지 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 임베딩 모델 (예: `text-embedding-004`)
    /// * `dimension` - 기대하는 벡터 차원
    pub fn new(api_key: String, model: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::configuration("Embedding dimension must be positive"));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key,
            model: model.trim_start_matches("models/").to_string(),
            client,
            dimension,
            rate_limiter: None,
        })
    }

    /// 설정에서 생성
    pub fn from_config(models: &ModelConfig, http: &HttpConfig) -> Result<Self> {
        let api_key = models
            .api_key
            .clone()
            .ok_or_else(|| RagError::configuration("GOOGLE_API_KEY (or GEMINI_API_KEY) not set"))?;

        let embedder = Self::new(
            api_key,
            &models.embedding_model,
            models.embedding_dimension,
            http.timeout(),
        )?
        .with_rate_limit(models.embed_requests_per_minute);

        tracing::info!(
            "Using Gemini embedding model {} (dimension: {})",
            embedder.model,
            embedder.dimension
        );
        Ok(embedder)
    }

    /// 분당 요청 수 제한 설정 (0 = 제한 없음)
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limiter = (requests_per_minute > 0)
            .then(|| Arc::new(Mutex::new(RateLimiter::per_minute(requests_per_minute))));
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:embedContent", GEMINI_API_BASE, self.model)
    }

    async fn embed_with_task(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.lock().await.acquire().await;
        }

        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type,
        };

        // API 키는 URL이 아닌 헤더로 전송
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::embedding(format!("Failed to send embedding request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::embedding(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                return Err(RagError::embedding(format!(
                    "Gemini API error ({}): {}",
                    error.error.status, error.error.message
                )));
            }
            return Err(RagError::embedding(format!("Gemini API error ({}): {}", status, body)));
        }

        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| RagError::embedding(format!("Failed to parse embedding response: {}", e)))?;
        let values = parsed.embedding.values;

        if values.len() != self.dimension {
            return Err(RagError::embedding(format!(
                "Model {} returned {} dimensions, expected {}",
                self.model,
                values.len(),
                self.dimension
            )));
        }

        Ok(values)
    }
}

/// 임베딩 용도 (검색 품질을 위해 문서/질의를 구분)
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

/// Gemini API 요청 본문
/// source: https://ai.google.dev/api/embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: TaskType,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct GeminiError {
    pub(crate) error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorDetail {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, TaskType::RetrievalQuery).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // embedContent는 단건 API이므로 순차 처리
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// Tests
// ============================================================================
