//! 콘텐츠 추출 모듈
//!
//! PDF 바이트에서 페이지 단위 텍스트를 추출합니다.
//! pdf-extract는 CPU 바운드이고 일부 파일에서 panic할 수 있으므로
//! `spawn_blocking`에서 실행하고 결과를 기다립니다 (파일 간 병렬 처리 없음).

pub mod pdf;

use crate::error::{RagError, Result};

/// 추출된 PDF 페이지
#[derive(Debug, Clone, PartialEq)]
pub struct PdfPage {
    /// 페이지 번호 (1부터 시작)
    pub page_number: usize,
    /// PDF의 총 페이지 수 (빈 페이지 포함)
    pub total_pages: usize,
    pub text: String,
}

/// PDF 바이트에서 페이지 추출
///
/// 추출 실패(손상된 파일, 라이브러리 panic)는 `RagError::Fetch`로 반환합니다.
pub async fn extract_pdf_pages(bytes: Vec<u8>, label: &str) -> Result<Vec<PdfPage>> {
    let task_label = label.to_string();
    tokio::task::spawn_blocking(move || pdf::extract_pages_from_bytes(&bytes, &task_label))
        .await
        .map_err(|e| RagError::fetch(label, format!("PDF extraction task failed: {}", e)))?
}
