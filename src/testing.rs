//! 테스트용 가짜 구현 - 외부 서비스 없이 파이프라인 검증
//!
//! - `ScriptedRenderer`: URL → HTML 고정 응답
//! - `HashEmbedder`: 단어 해시 기반 결정적 임베딩
//! - `MemoryVectorStore`: 메모리 내 코사인 검색
//! - `GroundedGenerator`: 컨텍스트에서 가장 겹치는 문장을 답변으로 반환

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};

use crate::chat::REFUSAL_MESSAGE;
use crate::collector::CollectedPdf;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationProvider, TextStream};
use crate::knowledge::{
    cosine_similarity, ChunkMetadata, IndexStats, VectorMatch, VectorRecord, VectorStore,
};
use crate::loader::{ContentType, Document, DocumentMetadata};
use crate::scraper::PageRenderer;
use crate::source_log::fingerprint_bytes;

// ============================================================================
// Fixtures
// ============================================================================

/// 한 줄 텍스트가 들어간 1페이지 PDF 작성
pub fn write_text_pdf(path: &Path, text: &str) {
    write_pages_pdf(path, &[text]);
}

/// 페이지마다 한 줄씩 들어간 PDF 작성 (빈 문자열이면 빈 페이지)
pub fn write_pages_pdf(path: &Path, pages: &[&str]) {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = if text.is_empty() {
            vec![]
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(path).unwrap();
}

/// PDF 페이지 문서
pub fn pdf_document(file_name: &str, page: usize, text: &str) -> Document {
    let pdf = CollectedPdf {
        path: PathBuf::from("data_pdf").join(file_name),
        file_name: file_name.to_string(),
        size: text.len() as u64,
    };
    Document::from_pdf_page(
        &fingerprint_bytes(file_name.as_bytes()),
        &pdf,
        page,
        page,
        text.to_string(),
    )
}

/// 웹 페이지 문서
pub fn web_document(url: &str, text: &str) -> Document {
    Document::from_web_page(url, None, text.to_string())
}

/// 검색 결과 한 건
pub fn retrieved_chunk(id: &str, citation: &str, text: &str, score: f32) -> VectorMatch {
    let content_type = if citation.starts_with("http") {
        ContentType::Html
    } else {
        ContentType::Pdf
    };
    VectorMatch {
        id: id.to_string(),
        text: text.to_string(),
        score,
        metadata: ChunkMetadata {
            document_id: id.to_string(),
            chunk_index: 0,
            start_char: 0,
            end_char: text.chars().count(),
            document: DocumentMetadata {
                source: citation.to_string(),
                file_name: citation.to_string(),
                file_path: None,
                content_type,
                citation: citation.to_string(),
                page: None,
                total_pages: None,
                title: None,
            },
        },
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// ============================================================================
// ScriptedRenderer
// ============================================================================

/// 등록된 URL만 HTML을 돌려주는 렌더러
#[derive(Debug, Default)]
pub struct ScriptedRenderer {
    pages: HashMap<String, String>,
}

impl ScriptedRenderer {
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| RagError::fetch(url, "HTTP 404 Not Found"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// HashEmbedder
// ============================================================================

const HASH_DIMENSION: usize = 384;

/// 단어 해시 버킷 임베딩 (L2 정규화)
#[derive(Debug)]
pub struct HashEmbedder {
    model: String,
    calls: Arc<AtomicUsize>,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            model: "hash-embedder".to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl HashEmbedder {
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// embed 호출 횟수
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    fn bucket(word: &str) -> usize {
        let digest = Sha256::digest(word.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % HASH_DIMENSION as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut vector = vec![0.0f32; HASH_DIMENSION];
        for word in words(text) {
            vector[Self::bucket(&word)] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        HASH_DIMENSION
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 메모리 내 벡터 저장소 (전체 코사인 스캔)
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    records: Mutex<BTreeMap<String, VectorRecord>>,
    unreachable: AtomicBool,
}

impl MemoryVectorStore {
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// true면 모든 호출이 VectorStore 에러
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RagError::vector_store("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        self.check_reachable()?;
        let mut stored = self.records.lock().unwrap();
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        self.check_reachable()?;
        let stored = self.records.lock().unwrap();

        let mut matches: Vec<VectorMatch> = stored
            .values()
            .map(|record| VectorMatch {
                id: record.id.clone(),
                text: record.text.clone(),
                score: cosine_similarity(embedding, &record.embedding),
                metadata: record.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe(&self) -> Result<IndexStats> {
        self.check_reachable()?;
        let stored = self.records.lock().unwrap();
        Ok(IndexStats {
            dimension: stored.values().next().map(|r| r.embedding.len()),
            total_vector_count: stored.len(),
        })
    }

    fn descriptor(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// GroundedGenerator
// ============================================================================

const STOPWORDS: &[&str] = &[
    "when", "was", "who", "what", "is", "the", "a", "an", "of", "in", "at", "to", "how", "does",
    "do", "did", "are", "about", "on", "for", "by", "and", "it", "me", "tell",
];

const CONTEXT_FENCE: &str = "---------------------";

/// 컨텍스트 안에서만 답하는 생성기
///
/// 질문 핵심 단어와 가장 많이 겹치는 문장을 답으로 돌려주고,
/// 겹치는 문장이 없으면 거절 문구를 돌려줍니다.
#[derive(Debug, Default)]
pub struct GroundedGenerator {
    system_prompts: Mutex<Vec<String>>,
    stream_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    fail_streams: AtomicBool,
    empty_streams: AtomicBool,
}

impl GroundedGenerator {
    pub fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().unwrap().clone()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// true면 스트림이 첫 조각 뒤에 끊김
    pub fn fail_streams(&self, fail: bool) {
        self.fail_streams.store(fail, Ordering::SeqCst);
    }

    /// true면 스트림이 공백 조각 하나만 보냄
    pub fn empty_streams(&self, empty: bool) {
        self.empty_streams.store(empty, Ordering::SeqCst);
    }

    fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
        let Some(from) = text.find(start).map(|i| i + start.len()) else {
            return "";
        };
        let rest = &text[from..];
        match rest.find(end) {
            Some(to) => &rest[..to],
            None => rest,
        }
    }

    fn condense(prompt: &str) -> String {
        let history = Self::between(prompt, "<Chat History>\n", "\n\n<Follow Up Message>");
        let follow_up = Self::between(prompt, "<Follow Up Message>\n", "\n\n<Standalone question>");
        let last_user = history
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix("user: "))
            .unwrap_or_default();
        format!("{} {}", follow_up.trim(), last_user.trim())
            .trim()
            .to_string()
    }

    fn answer(prompt: &str) -> String {
        let context = Self::between(prompt, &format!("{}\n", CONTEXT_FENCE), &format!("\n{}", CONTEXT_FENCE));
        let question = Self::between(prompt, "Question: ", "\nAnswer:");

        let keywords: HashSet<String> = words(question)
            .into_iter()
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect();

        let mut best: Option<(usize, &str)> = None;
        for line in context.lines().filter(|l| !l.starts_with("[Source:")) {
            for sentence in line.split_inclusive(&['.', '!', '?'][..]) {
                let sentence = sentence.trim();
                if sentence.is_empty() {
                    continue;
                }
                let sentence_words: HashSet<String> = words(sentence).into_iter().collect();
                let overlap = keywords.intersection(&sentence_words).count();
                if overlap > best.map(|(score, _)| score).unwrap_or(0) {
                    best = Some((overlap, sentence));
                }
            }
        }

        match best {
            Some((_, sentence)) => sentence.to_string(),
            None => REFUSAL_MESSAGE.to_string(),
        }
    }
}

#[async_trait]
impl GenerationProvider for GroundedGenerator {
    async fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("<Follow Up Message>") {
            return Ok(Self::condense(prompt));
        }
        Ok(Self::answer(prompt))
    }

    async fn generate_stream(&self, prompt: &str, system: Option<&str>) -> Result<TextStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(system) = system {
            self.system_prompts.lock().unwrap().push(system.to_string());
        }

        if self.empty_streams.load(Ordering::SeqCst) {
            return Ok(futures::stream::iter(vec![Ok::<_, RagError>(" \n".to_string())]).boxed());
        }

        let answer = Self::answer(prompt);
        let mut pieces: Vec<Result<String>> = answer
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();

        if self.fail_streams.load(Ordering::SeqCst) {
            pieces.truncate(1);
            pieces.push(Err(RagError::Generation("stream interrupted".to_string())));
        }

        Ok(futures::stream::iter(pieces).boxed())
    }

    fn model_id(&self) -> &str {
        "grounded-generator"
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatEngine;
    use crate::config::{ChatConfig, PathsConfig};
    use crate::knowledge::{IndexHandle, Indexer, WindowChunker};
    use crate::loader::{DocumentLoader, LoadOptions};
    use crate::scraper::WebScraper;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pdf_to_grounded_answer() {
        let dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().join("data"),
            pdf_dir: dir.path().join("data_pdf"),
            url_file: dir.path().join("data_web").join("urls.txt"),
        };
        std::fs::create_dir_all(&paths.pdf_dir).unwrap();
        write_text_pdf(&paths.pdf_dir.join("history.pdf"), "AMU was founded in 1875.");

        let loader = DocumentLoader::new(&paths, WebScraper::new(Arc::new(ScriptedRenderer::default())));

        let embedder = Arc::new(HashEmbedder::default());
        let store = Arc::new(MemoryVectorStore::default());
        let report = Indexer::new(
            WindowChunker::new(1024, 100).unwrap(),
            embedder.clone(),
            store.clone(),
            paths.manifest_path(),
        )
        .ingest(&loader, LoadOptions::default())
        .await
        .unwrap();
        assert_eq!(report.load.pdfs.new, 1);
        assert_eq!(report.build.chunks, 1);

        let handle = IndexHandle::load(&paths.manifest_path(), embedder, store)
            .await
            .unwrap();
        let engine = Arc::new(ChatEngine::new(
            handle.as_retriever(10),
            Arc::new(GroundedGenerator::default()),
            ChatConfig::default(),
        ));

        let response = engine.ask("When was AMU founded?", |_| {}).await.unwrap();
        assert!(response.answer.contains("1875"));
        assert_eq!(response.citations, vec!["history.pdf".to_string()]);

        let response = engine
            .ask("Who is the captain of the cricket team?", |_| {})
            .await
            .unwrap();
        assert_eq!(response.answer, REFUSAL_MESSAGE);
        assert!(response.citations.is_empty());
    }
}
