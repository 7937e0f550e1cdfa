//! 설정 모듈 - 모든 컴포넌트에 명시적으로 전달되는 설정 구조체
//!
//! 전역 설정 객체 대신 `RagConfig`를 한 번 만들어 각 컴포넌트 생성자에 넘깁니다.
//! 값은 환경변수(.env 포함)에서 읽고, CLI 플래그로 일부를 덮어씁니다.
//!
//! ## 환경변수
//! - `GOOGLE_API_KEY` / `GEMINI_API_KEY`: Gemini 임베딩 + 생성
//! - `PINECONE_API_KEY`, `PINECONE_INDEX_NAME`, `PINECONE_INDEX_HOST`
//! - `ASKAMU_VECTOR_BACKEND`: `pinecone` (기본) | `lance`
//! - `ASKAMU_DATA_DIR`, `ASKAMU_PDF_DIR`, `ASKAMU_URL_FILE`
//! - `ASKAMU_BROWSER_ENDPOINT`, `ASKAMU_BROWSER_TOKEN`
//! - `ASKAMU_EMBED_MODEL`, `ASKAMU_LLM_MODEL`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 기본 Pinecone 인덱스 이름
pub const DEFAULT_INDEX_NAME: &str = "chat-amu-index";

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    pub paths: PathsConfig,
    pub chunking: ChunkingConfig,
    pub models: ModelConfig,
    pub vector_store: VectorStoreConfig,
    pub chat: ChatConfig,
    pub scraper: ScraperConfig,
    pub http: HttpConfig,
}

/// 파일 경로 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// 상태 디렉토리 (소스 로그, 인덱스 매니페스트, LanceDB)
    pub data_dir: PathBuf,
    /// PDF 코퍼스 폴더 (평면 구조)
    pub pdf_dir: PathBuf,
    /// URL 시드 목록 파일
    pub url_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            pdf_dir: PathBuf::from("data_pdf"),
            url_file: PathBuf::from("data_web/urls.txt"),
        }
    }
}

impl PathsConfig {
    /// 소스 로그 경로 (data/processed_log.json)
    pub fn source_log_path(&self) -> PathBuf {
        self.data_dir.join("processed_log.json")
    }

    /// 인덱스 매니페스트 디렉토리 (data/vector_index)
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("vector_index")
    }

    /// 인덱스 매니페스트 파일
    pub fn manifest_path(&self) -> PathBuf {
        self.index_dir().join("manifest.json")
    }

    /// 로컬 LanceDB 디렉토리
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

/// 청킹 설정 (단위: 공백 기준 단어)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 100,
        }
    }
}

/// 임베딩 / 생성 모델 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    /// 인덱싱과 질의에 같은 모델을 써야 함 (매니페스트에 기록됨)
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub generation_model: String,
    pub temperature: f32,
    /// 임베딩 호출 간격 제한 (0 = 제한 없음). 재시도는 하지 않음
    pub embed_requests_per_minute: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            embedding_model: "text-embedding-004".to_string(),
            embedding_dimension: 768,
            generation_model: "gemini-2.0-flash".to_string(),
            temperature: 0.1,
            embed_requests_per_minute: 0,
        }
    }
}

/// 벡터 저장소 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Pinecone 서버리스 인덱스 (REST)
    #[default]
    Pinecone,
    /// 로컬 LanceDB 디렉토리
    Lance,
}

impl std::str::FromStr for VectorBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "lance" | "lancedb" => Ok(Self::Lance),
            other => Err(RagError::configuration(format!(
                "Unknown vector backend '{}'. Use 'pinecone' or 'lance'",
                other
            ))),
        }
    }
}

/// 벡터 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub backend: VectorBackend,
    #[serde(skip_serializing, default)]
    pub pinecone_api_key: Option<String>,
    pub index_name: String,
    /// 비어 있으면 컨트롤 플레인에서 조회
    pub index_host: Option<String>,
    pub upsert_batch_size: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Pinecone,
            pinecone_api_key: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            index_host: None,
            upsert_batch_size: 100,
        }
    }
}

/// 대화 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub similarity_top_k: usize,
    /// 대화 메모리 토큰 예산 (추정치)
    pub memory_token_limit: usize,
    pub max_citations: usize,
    /// 생성 모델에 넘기는 컨텍스트 최대 길이 (문자)
    pub context_char_budget: usize,
    pub similarity_cutoff: Option<f32>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            similarity_top_k: 10,
            memory_token_limit: 5000,
            max_citations: 3,
            context_char_budget: 12_000,
            similarity_cutoff: None,
        }
    }
}

/// 웹 페이지 렌더링 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// 헤드리스 브라우저 서비스 (Browserless 호환 `/content`). 없으면 일반 HTTP GET
    pub browser_endpoint: Option<String>,
    #[serde(skip_serializing, default)]
    pub browser_token: Option<String>,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            browser_endpoint: None,
            browser_token: None,
            user_agent: concat!("askamu-rag/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP 클라이언트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// 요청 단위 타임아웃. 초과 시 해당 호출만 실패 (재시도 없음)
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Loading
// ============================================================================

impl RagConfig {
    /// 환경변수에서 설정 로드 (.env 파일이 있으면 먼저 읽음)
    pub fn from_env() -> Result<Self> {
        if dotenv::dotenv().is_ok() {
            tracing::debug!("Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정 구성 (테스트에서 환경변수 없이 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::default();

        if let Some(dir) = get("ASKAMU_DATA_DIR") {
            config.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("ASKAMU_PDF_DIR") {
            config.paths.pdf_dir = PathBuf::from(dir);
        }
        if let Some(file) = get("ASKAMU_URL_FILE") {
            config.paths.url_file = PathBuf::from(file);
        }

        // GOOGLE_API_KEY > GEMINI_API_KEY
        config.models.api_key = get("GOOGLE_API_KEY").or_else(|| get("GEMINI_API_KEY"));
        if let Some(model) = get("ASKAMU_EMBED_MODEL") {
            config.models.embedding_model = model;
        }
        if let Some(model) = get("ASKAMU_LLM_MODEL") {
            config.models.generation_model = model;
        }

        if let Some(backend) = get("ASKAMU_VECTOR_BACKEND") {
            config.vector_store.backend = backend.parse()?;
        }
        config.vector_store.pinecone_api_key = get("PINECONE_API_KEY");
        if let Some(name) = get("PINECONE_INDEX_NAME") {
            config.vector_store.index_name = name;
        }
        config.vector_store.index_host = get("PINECONE_INDEX_HOST");

        config.scraper.browser_endpoint = get("ASKAMU_BROWSER_ENDPOINT");
        config.scraper.browser_token = get("ASKAMU_BROWSER_TOKEN");

        Ok(config)
    }

    /// 공통 자격 증명 검증 (임베딩 + 벡터 저장소)
    fn validate_common(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.models.api_key.is_none() {
            missing.push("GOOGLE_API_KEY (or GEMINI_API_KEY)");
        }
        if self.vector_store.backend == VectorBackend::Pinecone {
            if self.vector_store.pinecone_api_key.is_none() {
                missing.push("PINECONE_API_KEY");
            }
            if self.vector_store.index_name.trim().is_empty() {
                missing.push("PINECONE_INDEX_NAME");
            }
        }

        if !missing.is_empty() {
            return Err(RagError::configuration(format!(
                "Missing environment variables: {}. Check your .env file.",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// 인덱스 빌드에 필요한 설정 검증
    pub fn validate_for_ingest(&self) -> Result<()> {
        self.validate_common()?;
        if self.chunking.chunk_size == 0 || self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::configuration(format!(
                "Invalid chunking: size={} overlap={} (overlap must be smaller than size)",
                self.chunking.chunk_size, self.chunking.chunk_overlap
            )));
        }
        Ok(())
    }

    /// 질의 경로에 필요한 설정 검증
    pub fn validate_for_query(&self) -> Result<()> {
        self.validate_common()?;
        if self.chat.similarity_top_k == 0 {
            return Err(RagError::configuration("similarity_top_k must be at least 1"));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Result<&str> {
        self.models
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::configuration("GOOGLE_API_KEY (or GEMINI_API_KEY) not set"))
    }
}

// ============================================================================
// Tests
// ============================================================================
