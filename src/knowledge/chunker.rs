//! Text Chunking Module
//!
//! 문서를 겹치는 단어 윈도우로 분할합니다.
//! 단위는 공백 기준 단어이며, 청크 텍스트는 첫 단어부터 마지막 단어까지의
//! 원문 구간입니다 (내부 공백/줄바꿈 보존).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::loader::{Document, DocumentMetadata};

// ============================================================================
// Node
// ============================================================================

/// 청크 (벡터 인덱스에 저장되는 단위)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// 안정적인 청크 ID (문서 ID + 인덱스 + 텍스트의 해시)
    pub id: String,
    pub document_id: String,
    /// 문서 내 청크 순서 (0부터)
    pub chunk_index: usize,
    pub text: String,
    /// 문서 텍스트 기준 문자 오프셋 [start, end)
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: DocumentMetadata,
}

/// 청크 ID 계산 (sha256 앞 32자)
pub fn chunk_id(document_id: &str, chunk_index: usize, text: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", document_id, chunk_index, text).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..32].to_string()
}

// ============================================================================
// WindowChunker
// ============================================================================

/// 단어 윈도우 청커
#[derive(Debug, Clone)]
pub struct WindowChunker {
    chunk_size: usize,
    overlap: usize,
}

/// 단어 하나의 위치
#[derive(Debug, Clone, Copy)]
struct WordSpan {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

impl WindowChunker {
    /// 파라미터 검증 후 생성 (size > 0, overlap < size)
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::configuration("chunk_size must be at least 1"));
        }
        if overlap >= chunk_size {
            return Err(RagError::configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }

        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// 여러 문서 청킹 (문서 순서 유지)
    pub fn chunk(&self, documents: &[Document]) -> Vec<Node> {
        documents
            .iter()
            .flat_map(|doc| self.chunk_document(doc))
            .collect()
    }

    /// 문서 하나 청킹
    ///
    /// 빈 텍스트는 청크 0개, `chunk_size` 이하 단어는 청크 1개.
    pub fn chunk_document(&self, document: &Document) -> Vec<Node> {
        let text = document.text.as_str();
        let words = word_spans(text);

        if words.is_empty() {
            return vec![];
        }

        let step = self.chunk_size - self.overlap;
        let mut nodes = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.chunk_size).min(words.len());
            let first = words[start];
            let last = words[end - 1];

            let chunk_text = &text[first.byte_start..last.byte_end];
            let chunk_index = nodes.len();

            nodes.push(Node {
                id: chunk_id(&document.id, chunk_index, chunk_text),
                document_id: document.id.clone(),
                chunk_index,
                text: chunk_text.to_string(),
                start_char: first.char_start,
                end_char: last.char_end,
                metadata: document.metadata.clone(),
            });

            if end >= words.len() {
                break;
            }
            start += step;
        }

        nodes
    }
}

/// 텍스트의 단어 위치 목록 (공백 기준)
fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut char_count = 0;

    for (byte_idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some((byte_start, char_start)) = current.take() {
                spans.push(WordSpan {
                    byte_start,
                    byte_end: byte_idx,
                    char_start,
                    char_end: char_count,
                });
            }
        } else if current.is_none() {
            current = Some((byte_idx, char_count));
        }
        char_count += 1;
    }

    if let Some((byte_start, char_start)) = current {
        spans.push(WordSpan {
            byte_start,
            byte_end: text.len(),
            char_start,
            char_end: char_count,
        });
    }

    spans
}

/// 예상 청크 수 (단어 L개, 크기 C, 오버랩 O)
pub fn expected_chunk_count(words: usize, chunk_size: usize, overlap: usize) -> usize {
    if words == 0 {
        0
    } else if words <= chunk_size {
        1
    } else {
        let step = chunk_size - overlap;
        (words - overlap).div_ceil(step)
    }
}

// ============================================================================
// Tests
// ============================================================================
