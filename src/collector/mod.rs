//! 소스 수집 모듈
//!
//! - PDF 코퍼스 폴더(평면 구조)에서 `.pdf` 파일 목록 수집
//! - URL 시드 파일에서 `http`로 시작하는 줄만 수집
//!
//! 폴더나 파일이 없으면 `SourceUnavailable` - 호출 측은 문서 0개로 취급합니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{RagError, Result};

// ============================================================================
// Collected PDF
// ============================================================================

/// 수집된 PDF 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedPdf {
    /// 파일 경로
    pub path: PathBuf,
    /// 파일 이름 (인용 키로 사용)
    pub file_name: String,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedPdf {
    /// 경로에서 생성. PDF가 아니거나 일반 파일이 아니면 None
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        if !is_pdf(&path) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                tracing::warn!("Skipping PDF with non UTF-8 name: {:?}", path);
                return Ok(None);
            }
        };

        Ok(Some(Self {
            path,
            file_name,
            size: metadata.len(),
        }))
    }
}

/// 확장자로 PDF 여부 판단 (대소문자 무시)
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

// ============================================================================
// PDF Collector
// ============================================================================

/// PDF 폴더 수집기
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfCollector;

impl PdfCollector {
    /// 폴더 바로 아래의 PDF 파일 수집 (하위 폴더, 숨김 파일은 보지 않음)
    ///
    /// 결과는 파일 이름 순으로 정렬됩니다.
    pub fn collect(&self, dir: &Path) -> Result<Vec<CollectedPdf>> {
        if !dir.is_dir() {
            return Err(RagError::SourceUnavailable(format!(
                "PDF folder not found: {:?}",
                dir
            )));
        }

        let walker = WalkBuilder::new(dir)
            .max_depth(Some(1))
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .build();

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedPdf::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to collect {:?}: {}", entry.path(), e);
                }
            }
        }

        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        tracing::info!("Collected {} PDF files from {:?}", files.len(), dir);
        Ok(files)
    }
}

// ============================================================================
// URL Seed List
// ============================================================================

/// URL 시드 파일 읽기
///
/// `http`로 시작하지 않는 줄은 조용히 무시합니다 (에러 아님).
/// 중복 URL은 처음 등장한 것만 남깁니다.
pub fn read_url_seeds(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(RagError::SourceUnavailable(format!(
            "URL file not found: {:?}",
            path
        )));
    }

    let raw = std::fs::read_to_string(path)?;
    Ok(parse_url_seeds(&raw))
}

/// 시드 텍스트에서 URL 추출
pub fn parse_url_seeds(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    raw.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http"))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    pub fn from_files(files: &[CollectedPdf]) -> Self {
        Self {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
