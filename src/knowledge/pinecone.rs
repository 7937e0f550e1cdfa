//! Pinecone Vector Store - 서버리스 인덱스 REST 클라이언트
//!
//! 데이터 플레인: `/vectors/upsert`, `/query`, `/describe_index_stats`
//! 호스트가 설정되지 않으면 컨트롤 플레인 `GET /indexes/{name}`으로 조회합니다.
//!
//! 메타데이터는 평면 JSON이어야 하고 null을 허용하지 않으므로
//! null 필드는 제거하고 청크 텍스트는 `text` 키에 함께 저장합니다.
//! ref: https://docs.pinecone.io/reference/api/introduction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::vector::{ChunkMetadata, IndexStats, VectorMatch, VectorRecord, VectorStore};
use crate::config::{HttpConfig, VectorStoreConfig};
use crate::error::{RagError, Result};

/// 컨트롤 플레인 엔드포인트
const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// REST API 버전 헤더 값
const API_VERSION: &str = "2024-07";

/// 메타데이터에서 청크 텍스트를 담는 키
const TEXT_KEY: &str = "text";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector<'a>>,
}

#[derive(Debug, Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStatsResponse {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: usize,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

// ============================================================================
// PineconeVectorStore
// ============================================================================

/// Pinecone 벡터 저장소
pub struct PineconeVectorStore {
    client: reqwest::Client,
    api_key: String,
    index_name: String,
    host: String,
}

impl PineconeVectorStore {
    /// 인덱스에 연결 (호스트 미설정 시 조회)
    pub async fn connect(config: &VectorStoreConfig, http: &HttpConfig) -> Result<Self> {
        let api_key = config
            .pinecone_api_key
            .clone()
            .ok_or_else(|| RagError::configuration("PINECONE_API_KEY not set"))?;

        let client = reqwest::Client::builder().timeout(http.timeout()).build()?;

        let host = match &config.index_host {
            Some(host) => host.clone(),
            None => resolve_host(&client, &api_key, &config.index_name).await?,
        };

        tracing::info!("Using Pinecone index '{}' at {}", config.index_name, host);

        Ok(Self {
            client,
            api_key,
            index_name: config.index_name.clone(),
            host: normalize_host(&host),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::vector_store(format!("Pinecone request {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::vector_store(format!(
                "Pinecone {} returned {}: {}",
                path, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RagError::vector_store(format!("Invalid Pinecone {} response: {}", path, e)))
    }
}

/// 컨트롤 플레인에서 인덱스 호스트 조회
async fn resolve_host(client: &reqwest::Client, api_key: &str, index_name: &str) -> Result<String> {
    let response = client
        .get(format!("{}/indexes/{}", CONTROL_PLANE_URL, index_name))
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
        .send()
        .await
        .map_err(|e| RagError::vector_store(format!("Failed to describe index: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::vector_store(format!(
            "Pinecone index '{}' not available ({}): {}",
            index_name, status, body
        )));
    }

    let description: IndexDescription = response
        .json()
        .await
        .map_err(|e| RagError::vector_store(format!("Invalid index description: {}", e)))?;
    Ok(description.host)
}

/// 스킴이 없으면 https를 붙이고 끝의 `/` 제거
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// 레코드 → Pinecone 메타데이터 (null 제거, 텍스트 포함)
fn to_pinecone_metadata(record: &VectorRecord) -> Result<Map<String, Value>> {
    let mut map = match serde_json::to_value(&record.metadata)? {
        Value::Object(map) => map,
        other => {
            return Err(RagError::vector_store(format!(
                "Chunk metadata must be an object, got {}",
                other
            )))
        }
    };
    map.retain(|_, value| !value.is_null());
    map.insert(TEXT_KEY.to_string(), Value::String(record.text.clone()));
    Ok(map)
}

/// Pinecone 메타데이터 → (텍스트, 청크 메타데이터)
///
/// Pinecone은 숫자를 실수로 돌려주므로 정수 값은 정수로 되돌립니다.
fn from_pinecone_metadata(mut map: Map<String, Value>) -> Result<(String, ChunkMetadata)> {
    let text = match map.remove(TEXT_KEY) {
        Some(Value::String(text)) => text,
        _ => return Err(RagError::vector_store("Match metadata has no chunk text")),
    };

    for value in map.values_mut() {
        if let Some(f) = value.as_f64() {
            if f.fract() == 0.0 && f >= 0.0 {
                *value = Value::from(f as u64);
            }
        }
    }

    let metadata: ChunkMetadata = serde_json::from_value(Value::Object(map))
        .map_err(|e| RagError::vector_store(format!("Invalid match metadata: {}", e)))?;
    Ok((text, metadata))
}

/// 검색 결과 변환 (메타데이터가 없거나 깨진 매치는 건너뜀)
fn decode_matches(raw: Vec<QueryMatch>) -> Vec<VectorMatch> {
    let mut matches = Vec::with_capacity(raw.len());
    for m in raw {
        let Some(metadata) = m.metadata else {
            tracing::warn!("Pinecone match {} has no metadata, skipping", m.id);
            continue;
        };
        match from_pinecone_metadata(metadata) {
            Ok((text, metadata)) => matches.push(VectorMatch {
                id: m.id,
                text,
                score: m.score,
                metadata,
            }),
            Err(e) => tracing::warn!("Pinecone match {} has invalid metadata, skipping: {}", m.id, e),
        }
    }
    matches
}

#[async_trait]
impl VectorStore for PineconeVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let vectors = records
            .iter()
            .map(|record| {
                Ok(PineconeVector {
                    id: &record.id,
                    values: &record.embedding,
                    metadata: to_pinecone_metadata(record)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let response: UpsertResponse = self
            .post("/vectors/upsert", &UpsertRequest { vectors })
            .await?;

        tracing::debug!("Pinecone upserted {} vectors", response.upserted_count);
        Ok(response.upserted_count)
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        if top_k == 0 {
            return Ok(vec![]);
        }

        let request = QueryRequest {
            vector: embedding,
            top_k,
            include_metadata: true,
            include_values: false,
        };
        let response: QueryResponse = self.post("/query", &request).await?;

        Ok(decode_matches(response.matches))
    }

    async fn describe(&self) -> Result<IndexStats> {
        let response: DescribeStatsResponse = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .await?;

        Ok(IndexStats {
            dimension: response.dimension,
            total_vector_count: response.total_vector_count,
        })
    }

    fn descriptor(&self) -> String {
        format!("pinecone:{}@{}", self.index_name, self.host)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ContentType, DocumentMetadata};

    fn web_record() -> VectorRecord {
        VectorRecord {
            id: "c0ffee".to_string(),
            text: "Admissions open in May.".to_string(),
            metadata: ChunkMetadata {
                document_id: "https://www.amu.ac.in/admissions".to_string(),
                chunk_index: 2,
                start_char: 40,
                end_char: 63,
                document: DocumentMetadata {
                    source: "https://www.amu.ac.in/admissions".to_string(),
                    file_name: "www.amu.ac.in_admissions.html".to_string(),
                    file_path: None,
                    content_type: ContentType::Html,
                    citation: "https://www.amu.ac.in/admissions".to_string(),
                    page: None,
                    total_pages: None,
                    title: Some("Admissions".to_string()),
                },
            },
            embedding: vec![0.1, 0.2],
        }
    }

    #[test]
    fn test_metadata_has_no_nulls_and_carries_text() {
        let map = to_pinecone_metadata(&web_record()).unwrap();
        assert!(map.values().all(|v| !v.is_null()));
        assert!(!map.contains_key("file_path"));
        assert_eq!(map["text"], "Admissions open in May.");
        assert_eq!(map["citation"], "https://www.amu.ac.in/admissions");
    }

    #[test]
    fn test_metadata_from_float_numbers() {
        let record = web_record();
        let mut map = to_pinecone_metadata(&record).unwrap();
        // Pinecone은 숫자를 실수로 반환
        map.insert("chunk_index".to_string(), serde_json::json!(2.0));
        map.insert("start_char".to_string(), serde_json::json!(40.0));
        map.insert("end_char".to_string(), serde_json::json!(63.0));

        let (text, metadata) = from_pinecone_metadata(map).unwrap();
        assert_eq!(text, record.text);
        assert_eq!(metadata, record.metadata);
    }

    #[test]
    fn test_metadata_without_text_is_error() {
        let mut map = to_pinecone_metadata(&web_record()).unwrap();
        map.remove("text");
        assert!(from_pinecone_metadata(map).is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(
            normalize_host("chat-amu-index-abc.svc.pinecone.io/"),
            "https://chat-amu-index-abc.svc.pinecone.io"
        );
        assert_eq!(normalize_host("http://localhost:5080"), "http://localhost:5080");
    }

    #[test]
    fn test_query_response_parsing() {
        let body = r#"{"matches":[{"id":"a","score":0.91,"metadata":{"text":"t"}},{"id":"b","score":0.5}],"namespace":""}"#;
        let parsed: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.matches.len(), 2);
        assert!(parsed.matches[1].metadata.is_none());

        let stats: DescribeStatsResponse =
            serde_json::from_str(r#"{"dimension":768,"totalVectorCount":42,"namespaces":{}}"#).unwrap();
        assert_eq!(stats.dimension, Some(768));
        assert_eq!(stats.total_vector_count, 42);
    }

    #[test]
    fn test_bad_match_is_skipped() {
        let good = to_pinecone_metadata(&web_record()).unwrap();
        let mut broken = good.clone();
        broken.remove("citation");

        let matches = decode_matches(vec![
            QueryMatch {
                id: "broken".to_string(),
                score: 0.95,
                metadata: Some(broken),
            },
            QueryMatch {
                id: "bare".to_string(),
                score: 0.9,
                metadata: None,
            },
            QueryMatch {
                id: "c0ffee".to_string(),
                score: 0.8,
                metadata: Some(good),
            },
        ]);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "c0ffee");
        assert_eq!(matches[0].text, "Admissions open in May.");
        assert_eq!(matches[0].metadata, web_record().metadata);
    }
}
