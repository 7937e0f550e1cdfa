//! 문서 로더 - PDF 폴더와 URL 시드 목록에서 새 문서만 로드
//!
//! 두 하위 로더는 독립적이며 메모리 안의 로그에만 기록합니다.
//! 로그 파일은 인덱싱이 끝난 뒤 `commit`으로 저장합니다.
//! 항목 단위 실패는 로그만 남기고 건너뛰며, 실패한 항목은 기록하지 않습니다.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::collector::{read_url_seeds, CollectedPdf, CollectionStats, PdfCollector};
use crate::config::PathsConfig;
use crate::error::{RagError, Result};
use crate::extractor::extract_pdf_pages;
use crate::scraper::WebScraper;
use crate::source_log::{fingerprint_bytes, normalize_url, SourceLog};

// ============================================================================
// Document
// ============================================================================

/// 문서 콘텐츠 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "application/pdf")]
    Pdf,
    #[serde(rename = "text/html")]
    Html,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Html => "text/html",
        }
    }
}

/// 문서 메타데이터 (청크가 그대로 상속)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// 원본 식별자 (PDF 파일 경로 또는 URL)
    pub source: String,
    /// 표시 이름 (PDF 파일 이름 또는 URL에서 만든 슬러그)
    pub file_name: String,
    pub file_path: Option<String>,
    pub content_type: ContentType,
    /// 인용 키 (PDF: 파일 이름, 웹: URL)
    pub citation: String,
    pub page: Option<usize>,
    pub total_pages: Option<usize>,
    pub title: Option<String>,
}

/// 로드된 문서 (불변)
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// `<지문>#page-<n>` 또는 정규화된 URL
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// PDF 한 페이지로 문서 생성
    pub fn from_pdf_page(
        fingerprint: &str,
        pdf: &CollectedPdf,
        page: usize,
        total_pages: usize,
        text: String,
    ) -> Self {
        Self {
            id: format!("{}#page-{}", fingerprint, page),
            text,
            metadata: DocumentMetadata {
                source: pdf.path.display().to_string(),
                file_name: pdf.file_name.clone(),
                file_path: Some(pdf.path.display().to_string()),
                content_type: ContentType::Pdf,
                citation: pdf.file_name.clone(),
                page: Some(page),
                total_pages: Some(total_pages),
                title: None,
            },
        }
    }

    /// 스크랩된 웹 페이지로 문서 생성
    pub fn from_web_page(url: &str, title: Option<String>, text: String) -> Self {
        let normalized = normalize_url(url);
        Self {
            id: normalized.clone(),
            text,
            metadata: DocumentMetadata {
                source: normalized.clone(),
                file_name: url_slug(&normalized),
                file_path: None,
                content_type: ContentType::Html,
                citation: normalized,
                page: None,
                total_pages: None,
                title,
            },
        }
    }
}

/// URL에서 파일 이름 슬러그 생성 (`host_path_segments.html`)
pub fn url_slug(url: &str) -> String {
    let base = match url::Url::parse(url) {
        Ok(parsed) => {
            let mut parts: Vec<String> = Vec::new();
            if let Some(host) = parsed.host_str() {
                parts.push(host.to_string());
            }
            if let Some(segments) = parsed.path_segments() {
                parts.extend(segments.filter(|s| !s.is_empty()).map(str::to_string));
            }
            parts.join("_")
        }
        Err(_) => url.to_string(),
    };

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_matches('_');
    if sanitized.is_empty() {
        "page.html".to_string()
    } else {
        format!("{}.html", sanitized)
    }
}

// ============================================================================
// Load Report
// ============================================================================

/// 카테고리별 로드 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    /// 새로 처리되어 로그에 기록된 소스 수
    pub new: usize,
    /// 이미 로그에 있어 건너뛴 소스 수
    pub skipped: usize,
    /// 실패한 소스 수 (기록되지 않음)
    pub failed: usize,
    /// 생성된 문서 수
    pub documents: usize,
}

/// 전체 로드 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub pdfs: CategoryReport,
    pub urls: CategoryReport,
}

impl LoadReport {
    pub fn total_documents(&self) -> usize {
        self.pdfs.documents + self.urls.documents
    }
}

/// 한 번의 로드 결과 (아직 저장되지 않은 로그 포함)
#[derive(Debug, Clone, Default)]
pub struct LoadBatch {
    pub documents: Vec<Document>,
    pub report: LoadReport,
    /// 이번에 처리한 소스까지 기록된 로그. 인덱싱 성공 후 `commit`
    pub log: SourceLog,
}

impl LoadBatch {
    /// 새로 기록된 소스가 있는지
    pub fn has_new_sources(&self) -> bool {
        self.report.pdfs.new + self.report.urls.new > 0
    }
}

/// 로드 옵션 (`--skip-pdfs`, `--skip-urls`)
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub skip_pdfs: bool,
    pub skip_urls: bool,
}

// ============================================================================
// DocumentLoader
// ============================================================================

/// PDF + URL 문서 로더
pub struct DocumentLoader {
    pdf_dir: PathBuf,
    url_file: PathBuf,
    log_path: PathBuf,
    collector: PdfCollector,
    scraper: WebScraper,
}

impl DocumentLoader {
    pub fn new(paths: &PathsConfig, scraper: WebScraper) -> Self {
        Self {
            pdf_dir: paths.pdf_dir.clone(),
            url_file: paths.url_file.clone(),
            log_path: paths.source_log_path(),
            collector: PdfCollector,
            scraper,
        }
    }

    /// PDF와 URL 문서를 모두 로드 (PDF 먼저)
    ///
    /// 로그 파일은 건드리지 않습니다. 새 문서가 없으면 빈 목록 (에러 아님).
    pub async fn load_all(&self, options: LoadOptions) -> Result<LoadBatch> {
        let mut log = SourceLog::load(&self.log_path)?;
        let mut documents = Vec::new();
        let mut report = LoadReport::default();

        if options.skip_pdfs {
            tracing::info!("Skipping PDF sources");
        } else {
            let (docs, pdf_report) = self.load_pdfs(&mut log).await?;
            documents.extend(docs);
            report.pdfs = pdf_report;
        }

        if options.skip_urls {
            tracing::info!("Skipping URL sources");
        } else {
            let (docs, url_report) = self.load_urls(&mut log).await?;
            documents.extend(docs);
            report.urls = url_report;
        }

        tracing::info!(
            "Loaded {} new documents ({} from PDFs, {} from URLs)",
            documents.len(),
            report.pdfs.documents,
            report.urls.documents
        );
        Ok(LoadBatch {
            documents,
            report,
            log,
        })
    }

    /// 새 PDF 로드 (`log`에 없는 지문만, 성공한 항목은 `log`에 기록)
    pub async fn load_pdfs(&self, log: &mut SourceLog) -> Result<(Vec<Document>, CategoryReport)> {
        let files = match self.collector.collect(&self.pdf_dir) {
            Ok(files) => files,
            Err(RagError::SourceUnavailable(msg)) => {
                tracing::warn!("{}", msg);
                return Ok((Vec::new(), CategoryReport::default()));
            }
            Err(e) => return Err(e),
        };

        let stats = CollectionStats::from_files(&files);
        tracing::info!(
            "Found {} PDF files ({} bytes) in {:?}",
            stats.total_files,
            stats.total_size,
            self.pdf_dir
        );

        let mut documents = Vec::new();
        let mut report = CategoryReport::default();

        for pdf in &files {
            let bytes = match tokio::fs::read(&pdf.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", pdf.file_name, e);
                    report.failed += 1;
                    continue;
                }
            };

            let fingerprint = fingerprint_bytes(&bytes);
            if log.contains_pdf(&fingerprint) {
                tracing::debug!("Already ingested: {}", pdf.file_name);
                report.skipped += 1;
                continue;
            }

            match self.load_pdf(pdf, &fingerprint, bytes).await {
                Ok(docs) => {
                    tracing::info!("Loaded {}: {} pages with text", pdf.file_name, docs.len());
                    report.new += 1;
                    report.documents += docs.len();
                    documents.extend(docs);
                    log.record_pdf(fingerprint);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", pdf.file_name, e);
                    report.failed += 1;
                }
            }
        }

        Ok((documents, report))
    }

    async fn load_pdf(
        &self,
        pdf: &CollectedPdf,
        fingerprint: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<Document>> {
        let pages = extract_pdf_pages(bytes, &pdf.file_name).await?;

        if pages.is_empty() {
            tracing::warn!(
                "No extractable text in {} (scanned document?), recording without documents",
                pdf.file_name
            );
        }

        Ok(pages
            .into_iter()
            .map(|page| {
                Document::from_pdf_page(
                    fingerprint,
                    pdf,
                    page.page_number,
                    page.total_pages,
                    page.text,
                )
            })
            .collect())
    }

    /// 새 URL 로드 (순차 처리, 동시 요청 없음)
    pub async fn load_urls(&self, log: &mut SourceLog) -> Result<(Vec<Document>, CategoryReport)> {
        let urls = match read_url_seeds(&self.url_file) {
            Ok(urls) => urls,
            Err(RagError::SourceUnavailable(msg)) => {
                tracing::warn!("{}", msg);
                return Ok((Vec::new(), CategoryReport::default()));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Found {} seed URLs in {:?} (renderer: {})",
            urls.len(),
            self.url_file,
            self.scraper.renderer_name()
        );

        let mut documents = Vec::new();
        let mut report = CategoryReport::default();

        for url in &urls {
            if log.contains_url(url) {
                tracing::debug!("Already ingested: {}", url);
                report.skipped += 1;
                continue;
            }

            match self.scraper.scrape(url).await {
                Ok(page) => {
                    tracing::info!("Scraped {} ({} chars)", url, page.content.len());
                    documents.push(Document::from_web_page(url, page.title, page.content));
                    report.new += 1;
                    report.documents += 1;
                    log.record_url(url);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", url, e);
                    report.failed += 1;
                }
            }
        }

        Ok((documents, report))
    }

    /// 로그 저장 (디스크의 최신 로그와 합친 뒤)
    ///
    /// 문서가 인덱스에 들어간 뒤에만 호출합니다.
    pub fn commit(&self, log: &SourceLog) -> Result<()> {
        let mut merged = SourceLog::load(&self.log_path)?;
        merged.merge(log);
        merged.save(&self.log_path)?;
        tracing::info!(
            "Source log committed: {} pdfs, {} urls",
            merged.pdf_count(),
            merged.url_count()
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
