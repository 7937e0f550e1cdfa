//! 소스 로그 - 이미 수집한 소스 추적
//!
//! PDF는 파일 내용의 SHA-256 지문으로, 웹 페이지는 정규화된 URL로 기록합니다.
//! 기록된 식별자는 다시 가져오거나 임베딩하지 않습니다.
//!
//! 저장 형식: `{"pdfs": [...], "urls": [...]}` (임시 파일에 쓴 뒤 rename)

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

// ============================================================================
// SourceLog
// ============================================================================

/// 수집 완료된 소스 목록
///
/// 집합은 커지기만 합니다 (삭제 API 없음).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLog {
    #[serde(default)]
    pdfs: BTreeSet<String>,
    #[serde(default)]
    urls: BTreeSet<String>,
}

impl SourceLog {
    /// 로그 파일 읽기
    ///
    /// 파일이 없으면 빈 로그를 반환합니다 (콜드 스타트).
    /// 파일이 있는데 파싱에 실패하면 에러 - 덮어쓰면 기록이 사라지기 때문입니다.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No source log at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let log: Self = serde_json::from_str(&raw).map_err(|e| {
            RagError::configuration(format!("Corrupt source log {:?}: {}", path, e))
        })?;

        tracing::debug!(
            "Loaded source log: {} pdfs, {} urls",
            log.pdfs.len(),
            log.urls.len()
        );
        Ok(log)
    }

    /// 로그 파일 저장 (원자적 교체)
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        tracing::debug!(
            "Saved source log: {} pdfs, {} urls -> {:?}",
            self.pdfs.len(),
            self.urls.len(),
            path
        );
        Ok(())
    }

    pub fn contains_pdf(&self, fingerprint: &str) -> bool {
        self.pdfs.contains(fingerprint)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(&normalize_url(url))
    }

    /// PDF 지문 기록. 새로 추가되면 true
    pub fn record_pdf(&mut self, fingerprint: impl Into<String>) -> bool {
        self.pdfs.insert(fingerprint.into())
    }

    /// URL 기록. 새로 추가되면 true
    pub fn record_url(&mut self, url: &str) -> bool {
        self.urls.insert(normalize_url(url))
    }

    /// 다른 로그와 합집합 (동시 실행으로 저장된 항목 보존)
    pub fn merge(&mut self, other: &SourceLog) {
        self.pdfs.extend(other.pdfs.iter().cloned());
        self.urls.extend(other.urls.iter().cloned());
    }

    pub fn pdf_count(&self) -> usize {
        self.pdfs.len()
    }

    pub fn url_count(&self) -> usize {
        self.urls.len()
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// 바이트 내용의 SHA-256 지문 (소문자 hex)
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// URL 정규화
///
/// 스킴/호스트 소문자화, fragment 제거. 파싱 실패 시 trim된 원문 사용.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

// ============================================================================
// Atomic JSON write
// ============================================================================

/// JSON을 임시 파일에 쓰고 rename으로 교체
///
/// 상위 디렉토리가 없으면 생성합니다. 중간에 중단돼도 기존 파일은 온전합니다.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(value)?;

    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
