//! 인덱서 - 청킹 → 임베딩 → upsert → 매니페스트 저장
//!
//! 매니페스트(`data/vector_index/manifest.json`)는 임베딩 모델과 차원을 기록합니다.
//! 다른 모델로 빌드하거나 로드하려 하면 실패합니다.
//!
//! 임베딩 + upsert + 매니페스트 저장은 트랜잭션이 아닙니다.
//! upsert 후 매니페스트 저장 전에 중단되면 재빌드가 필요할 수 있습니다.
//! 소스 로그는 빌드가 성공한 뒤에만 저장되므로 실패한 소스는 다음 수집에서 다시 읽힙니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunker::{Node, WindowChunker};
use super::retriever::Retriever;
use super::vector::{IndexStats, VectorRecord, VectorStore};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::loader::{Document, DocumentLoader, LoadOptions, LoadReport};
use crate::source_log::write_json_atomic;

/// 매니페스트 포맷 버전
pub const MANIFEST_VERSION: u32 = 1;

/// 기본 upsert 배치 크기
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// Manifest
// ============================================================================

/// 인덱스 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    /// 벡터 저장소 설명 (예: `pinecone:chat-amu-index@https://...`)
    pub backend: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// 누적 청크 수
    pub chunk_count: usize,
    /// 누적 문서 수
    pub document_count: usize,
    /// 인용 키별 누적 청크 수
    #[serde(default)]
    pub sources: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexManifest {
    fn new(backend: String, model: &str, dimension: usize, chunker: &WindowChunker) -> Self {
        let now = Utc::now();
        Self {
            version: MANIFEST_VERSION,
            backend,
            embedding_model: model.to_string(),
            embedding_dimension: dimension,
            chunk_size: chunker.chunk_size(),
            chunk_overlap: chunker.overlap(),
            chunk_count: 0,
            document_count: 0,
            sources: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 매니페스트 읽기 (파일이 없으면 None)
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let manifest = serde_json::from_str(&raw)?;
        Ok(Some(manifest))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// 임베딩 모델/차원 일치 여부 확인. 불일치하면 설명 메시지
    pub fn check_model(&self, model: &str, dimension: usize) -> std::result::Result<(), String> {
        if self.embedding_model != model || self.embedding_dimension != dimension {
            return Err(format!(
                "index was built with {} ({} dims) but {} ({} dims) is configured",
                self.embedding_model, self.embedding_dimension, model, dimension
            ));
        }
        Ok(())
    }

    /// 이번 빌드 결과를 누적
    fn record_build(&mut self, documents: usize, nodes: &[Node], chunker: &WindowChunker) {
        self.chunk_count += nodes.len();
        self.document_count += documents;
        for node in nodes {
            *self
                .sources
                .entry(node.metadata.citation.clone())
                .or_insert(0) += 1;
        }
        self.chunk_size = chunker.chunk_size();
        self.chunk_overlap = chunker.overlap();
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// 빌드 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub upserted: usize,
    /// 빌드 후 매니페스트의 누적 청크 수
    pub total_chunks: usize,
}

/// 수집 결과 (로드 + 빌드)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub load: LoadReport,
    pub build: BuildReport,
}

/// 인덱서
pub struct Indexer {
    chunker: WindowChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    manifest_path: PathBuf,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        chunker: WindowChunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        manifest_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            manifest_path: manifest_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// 새 소스 로드 → 빌드 → 소스 로그 저장
    ///
    /// 모델 검증은 로드 전에 합니다. 빌드가 실패하면 로그를 저장하지 않습니다.
    pub async fn ingest(&self, loader: &DocumentLoader, options: LoadOptions) -> Result<IngestReport> {
        self.load_manifest()?;

        let batch = loader.load_all(options).await?;
        let build = self.build(&batch.documents).await?;

        if batch.has_new_sources() {
            loader.commit(&batch.log)?;
        }

        Ok(IngestReport {
            load: batch.report,
            build,
        })
    }

    /// 기존 매니페스트 읽기 + 임베딩 모델 검증
    fn load_manifest(&self) -> Result<Option<IndexManifest>> {
        let Some(existing) = IndexManifest::load(&self.manifest_path)? else {
            return Ok(None);
        };

        existing
            .check_model(self.embedder.model_id(), self.embedder.dimension())
            .map_err(|msg| {
                RagError::configuration(format!(
                    "Embedding model mismatch: {}. Rebuild the index from scratch to switch models",
                    msg
                ))
            })?;
        Ok(Some(existing))
    }

    /// 문서로 인덱스 생성 또는 확장
    ///
    /// 문서나 청크가 없으면 저장소와 매니페스트를 건드리지 않습니다.
    pub async fn build(&self, documents: &[Document]) -> Result<BuildReport> {
        if documents.is_empty() {
            tracing::info!("No documents to index");
            return Ok(BuildReport::default());
        }

        let nodes = self.chunker.chunk(documents);
        if nodes.is_empty() {
            tracing::info!("{} documents produced no chunks, nothing to index", documents.len());
            return Ok(BuildReport {
                documents: documents.len(),
                ..BuildReport::default()
            });
        }

        let model = self.embedder.model_id();
        let dimension = self.embedder.dimension();

        // 모델 검증은 임베딩 전에
        let mut manifest = match self.load_manifest()? {
            Some(existing) => {
                if existing.chunk_size != self.chunker.chunk_size()
                    || existing.chunk_overlap != self.chunker.overlap()
                {
                    tracing::warn!(
                        "Chunking changed from {}/{} to {}/{}; existing chunks are kept",
                        existing.chunk_size,
                        existing.chunk_overlap,
                        self.chunker.chunk_size(),
                        self.chunker.overlap()
                    );
                }
                existing
            }
            None => IndexManifest::new(self.store.descriptor(), model, dimension, &self.chunker),
        };

        tracing::info!(
            "Indexing {} chunks from {} documents with {}",
            nodes.len(),
            documents.len(),
            model
        );

        let mut upserted = 0;
        let total_batches = nodes.len().div_ceil(self.batch_size);

        for (batch_idx, batch) in nodes.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(RagError::embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .cloned()
                .zip(embeddings)
                .map(|(node, embedding)| VectorRecord::from_node(node, embedding))
                .collect();

            upserted += self.store.upsert(&records).await?;
            tracing::info!(
                "Upserted batch {}/{} ({} vectors)",
                batch_idx + 1,
                total_batches,
                records.len()
            );
        }

        manifest.backend = self.store.descriptor();
        manifest.record_build(documents.len(), &nodes, &self.chunker);
        manifest.save(&self.manifest_path)?;

        tracing::info!(
            "Index manifest saved to {:?} ({} chunks total)",
            self.manifest_path,
            manifest.chunk_count
        );

        Ok(BuildReport {
            documents: documents.len(),
            chunks: nodes.len(),
            upserted,
            total_chunks: manifest.chunk_count,
        })
    }
}

// ============================================================================
// IndexHandle
// ============================================================================

/// 질의 가능한 인덱스 핸들 (재임베딩 없이 로드)
#[derive(Clone)]
pub struct IndexHandle {
    manifest: IndexManifest,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    stats: IndexStats,
}

impl IndexHandle {
    /// 매니페스트를 읽고 모델 + 저장소 연결 확인
    ///
    /// 모든 실패는 `IndexUnavailable`입니다.
    pub async fn load(
        manifest_path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let manifest = IndexManifest::load(manifest_path)
            .map_err(|e| {
                RagError::index_unavailable(format!("Cannot read manifest {:?}: {}", manifest_path, e))
            })?
            .ok_or_else(|| {
                RagError::index_unavailable(format!(
                    "No index manifest at {:?}. Run `askamu-rag ingest` first",
                    manifest_path
                ))
            })?;

        manifest
            .check_model(embedder.model_id(), embedder.dimension())
            .map_err(RagError::index_unavailable)?;

        let stats = store.describe().await.map_err(|e| {
            RagError::index_unavailable(format!("Vector store unreachable: {}", e))
        })?;

        if let Some(dimension) = stats.dimension {
            if dimension != manifest.embedding_dimension {
                return Err(RagError::index_unavailable(format!(
                    "Vector store dimension {} does not match manifest dimension {}",
                    dimension, manifest.embedding_dimension
                )));
            }
        }

        tracing::info!(
            "Loaded index: {} chunks in manifest, {} vectors in store",
            manifest.chunk_count,
            stats.total_vector_count
        );

        Ok(Self {
            manifest,
            embedder,
            store,
            stats,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// 리트리버 생성
    pub fn as_retriever(&self, top_k: usize) -> Retriever {
        Retriever::new(self.embedder.clone(), self.store.clone(), top_k)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::scraper::WebScraper;
    use crate::source_log::SourceLog;
    use crate::testing::{
        pdf_document, write_text_pdf, HashEmbedder, MemoryVectorStore, ScriptedRenderer,
    };
    use tempfile::TempDir;

    fn pdf_loader(dir: &TempDir) -> (PathsConfig, DocumentLoader) {
        let paths = PathsConfig {
            data_dir: dir.path().join("data"),
            pdf_dir: dir.path().join("data_pdf"),
            url_file: dir.path().join("data_web").join("urls.txt"),
        };
        std::fs::create_dir_all(&paths.pdf_dir).unwrap();
        write_text_pdf(&paths.pdf_dir.join("history.pdf"), "AMU was founded in 1875.");
        let loader = DocumentLoader::new(&paths, WebScraper::new(Arc::new(ScriptedRenderer::default())));
        (paths, loader)
    }

    fn indexer(dir: &TempDir, embedder: HashEmbedder, store: Arc<MemoryVectorStore>) -> Indexer {
        Indexer::new(
            WindowChunker::new(8, 2).unwrap(),
            Arc::new(embedder),
            store,
            dir.path().join("vector_index").join("manifest.json"),
        )
    }

    #[tokio::test]
    async fn test_empty_build_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVectorStore::default());
        let indexer = indexer(&dir, HashEmbedder::default(), store.clone());

        let report = indexer.build(&[]).await.unwrap();
        assert_eq!(report, BuildReport::default());

        let report = indexer
            .build(&[pdf_document("blank.pdf", 1, "   ")])
            .await
            .unwrap();
        assert_eq!(report.chunks, 0);

        assert_eq!(store.len(), 0);
        assert!(!dir.path().join("vector_index").join("manifest.json").exists());
    }

    #[tokio::test]
    async fn test_build_writes_manifest_and_extends() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVectorStore::default());
        let indexer = indexer(&dir, HashEmbedder::default(), store.clone()).with_batch_size(2);

        let text = "one two three four five six seven eight nine ten eleven twelve";
        let report = indexer
            .build(&[pdf_document("rules.pdf", 1, text)])
            .await
            .unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(report.upserted, 2);
        assert_eq!(store.len(), 2);

        let report = indexer
            .build(&[pdf_document("fees.pdf", 1, "tuition is due in july")])
            .await
            .unwrap();
        assert_eq!(report.total_chunks, 3);

        let manifest = IndexManifest::load(&dir.path().join("vector_index").join("manifest.json"))
            .unwrap()
            .unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(manifest.document_count, 2);
        assert_eq!(manifest.sources["rules.pdf"], 2);
        assert_eq!(manifest.sources["fees.pdf"], 1);
        assert_eq!(manifest.chunk_size, 8);
        assert_eq!(manifest.embedding_model, "hash-embedder");
        assert!(manifest.updated_at >= manifest.created_at);
    }

    #[tokio::test]
    async fn test_reupsert_same_document_does_not_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVectorStore::default());
        let indexer = indexer(&dir, HashEmbedder::default(), store.clone());

        let doc = pdf_document("rules.pdf", 1, "hostel gates close at ten");
        indexer.build(&[doc.clone()]).await.unwrap();
        indexer.build(&[doc]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_model_mismatch_fails_before_embedding() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVectorStore::default());

        indexer(&dir, HashEmbedder::default(), store.clone())
            .build(&[pdf_document("a.pdf", 1, "alpha beta")])
            .await
            .unwrap();

        let other = HashEmbedder::default().with_model("other-model");
        let calls = other.calls();
        let err = indexer(&dir, other, store.clone())
            .build(&[pdf_document("b.pdf", 1, "gamma delta")])
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::Configuration(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_load_requires_manifest_and_matching_model() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("vector_index").join("manifest.json");
        let store = Arc::new(MemoryVectorStore::default());

        let err = IndexHandle::load(&manifest_path, Arc::new(HashEmbedder::default()), store.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::IndexUnavailable(_)));

        indexer(&dir, HashEmbedder::default(), store.clone())
            .build(&[pdf_document("a.pdf", 1, "alpha beta")])
            .await
            .unwrap();

        let handle = IndexHandle::load(&manifest_path, Arc::new(HashEmbedder::default()), store.clone())
            .await
            .unwrap();
        assert_eq!(handle.stats().total_vector_count, 1);
        assert_eq!(handle.manifest().chunk_count, 1);

        let err = IndexHandle::load(
            &manifest_path,
            Arc::new(HashEmbedder::default().with_model("text-embedding-005")),
            store,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_load_fails_when_store_unreachable() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("vector_index").join("manifest.json");
        let store = Arc::new(MemoryVectorStore::default());

        indexer(&dir, HashEmbedder::default(), store.clone())
            .build(&[pdf_document("a.pdf", 1, "alpha beta")])
            .await
            .unwrap();

        store.set_unreachable(true);
        let err = IndexHandle::load(&manifest_path, Arc::new(HashEmbedder::default()), store)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_failed_ingest_leaves_sources_pending() {
        let dir = TempDir::new().unwrap();
        let (paths, loader) = pdf_loader(&dir);
        let store = Arc::new(MemoryVectorStore::default());
        let indexer = Indexer::new(
            WindowChunker::new(64, 8).unwrap(),
            Arc::new(HashEmbedder::default()),
            store.clone(),
            paths.manifest_path(),
        );

        store.set_unreachable(true);
        let err = indexer.ingest(&loader, LoadOptions::default()).await.unwrap_err();
        assert!(matches!(err, RagError::VectorStore(_)));
        assert!(!paths.source_log_path().exists());
        assert!(!paths.manifest_path().exists());

        store.set_unreachable(false);
        let report = indexer.ingest(&loader, LoadOptions::default()).await.unwrap();
        assert_eq!(report.load.pdfs.new, 1);
        assert_eq!(report.build.upserted, 1);
        assert_eq!(store.len(), 1);

        let log = SourceLog::load(&paths.source_log_path()).unwrap();
        assert_eq!(log.pdf_count(), 1);

        let report = indexer.ingest(&loader, LoadOptions::default()).await.unwrap();
        assert_eq!(report.load.pdfs.skipped, 1);
        assert_eq!(report.build, BuildReport::default());
    }

    #[tokio::test]
    async fn test_ingest_checks_model_before_loading() {
        let dir = TempDir::new().unwrap();
        let (paths, loader) = pdf_loader(&dir);
        let store = Arc::new(MemoryVectorStore::default());

        Indexer::new(
            WindowChunker::new(64, 8).unwrap(),
            Arc::new(HashEmbedder::default()),
            store.clone(),
            paths.manifest_path(),
        )
        .build(&[pdf_document("a.pdf", 1, "alpha beta")])
        .await
        .unwrap();

        let err = Indexer::new(
            WindowChunker::new(64, 8).unwrap(),
            Arc::new(HashEmbedder::default().with_model("other-model")),
            store,
            paths.manifest_path(),
        )
        .ingest(&loader, LoadOptions::default())
        .await
        .unwrap_err();

        assert!(matches!(err, RagError::Configuration(_)));
        assert!(!paths.source_log_path().exists());
    }
}
