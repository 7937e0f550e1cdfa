//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 페이지마다 따로 텍스트를 추출합니다.
//! 페이지 번호는 원본 PDF의 번호를 그대로 유지합니다.

use super::PdfPage;
use crate::error::{RagError, Result};

/// PDF 바이트에서 페이지별 텍스트 추출
///
/// 텍스트가 없는 페이지는 건너뛰지만 나머지 페이지 번호는 바뀌지 않습니다.
/// 모든 페이지가 비어 있으면 빈 벡터 (스캔 문서일 가능성).
pub fn extract_pages_from_bytes(bytes: &[u8], label: &str) -> Result<Vec<PdfPage>> {
    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
        RagError::fetch(label, format!("Failed to extract text from PDF: {}", e))
    })?;

    let total_pages = raw_pages.len();
    let pages: Vec<PdfPage> = raw_pages
        .into_iter()
        .enumerate()
        .filter_map(|(i, text)| {
            let text = text.trim();
            (!text.is_empty()).then(|| PdfPage {
                page_number: i + 1,
                total_pages,
                text: text.to_string(),
            })
        })
        .collect();

    if pages.is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {}. It might be a scanned document.",
            label
        );
    } else if pages.len() < total_pages {
        tracing::debug!(
            "{}: {} of {} pages have text",
            label,
            pages.len(),
            total_pages
        );
    }

    Ok(pages)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_pages_pdf;
    use tempfile::TempDir;

    #[test]
    fn test_garbage_bytes_are_fetch_error() {
        let err = extract_pages_from_bytes(b"definitely not a pdf", "junk.pdf").unwrap_err();
        assert!(matches!(err, RagError::Fetch { ref source_id, .. } if source_id == "junk.pdf"));
    }

    #[test]
    fn test_each_page_extracted_separately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prospectus.pdf");
        write_pages_pdf(&path, &["Admissions open in May", "Fee structure for 2024"]);

        let pages = extract_pages_from_bytes(&std::fs::read(&path).unwrap(), "prospectus.pdf").unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert!(pages[0].text.contains("Admissions"));
        assert_eq!(pages[1].page_number, 2);
        assert!(pages[1].text.contains("Fee structure"));
        assert!(pages.iter().all(|p| p.total_pages == 2));
    }
}
