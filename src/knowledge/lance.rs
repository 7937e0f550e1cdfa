//! LanceDB Vector Store - 로컬 벡터 인덱스
//!
//! Pinecone 없이 로컬 디렉토리에 인덱스를 유지할 때 사용합니다.
//! 메타데이터는 JSON 문자열 컬럼으로 저장합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::vector::{
    distance_to_similarity, ChunkMetadata, IndexStats, VectorMatch, VectorRecord, VectorStore,
};
use crate::error::{RagError, Result};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    path: PathBuf,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (테이블 스키마에 고정)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::configuration(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to connect to LanceDB: {}", e)))?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            dimension,
        })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch> {
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != self.dimension) {
            return Err(RagError::vector_store(format!(
                "Embedding for {} has dimension {}, expected {}",
                bad.id,
                bad.embedding.len(),
                self.dimension
            )));
        }

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let metadata = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata))
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::vector_store(format!("Failed to create embedding array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(|e| RagError::vector_store(format!("Failed to create RecordBatch: {}", e)))
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to list tables: {}", e)))?;
        Ok(names.iter().any(|name| name == TABLE_NAME))
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to open table: {}", e)))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::vector_store(format!("Missing {} column", name)))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await? {
            let table = self.open_table().await?;

            // 같은 ID는 한 번의 커밋으로 교체
            let mut merge = table.merge_insert(&["id"]);
            merge
                .when_matched_update_all(None)
                .when_not_matched_insert_all();
            merge
                .execute(Box::new(batches))
                .await
                .map_err(|e| RagError::vector_store(format!("Failed to upsert vectors: {}", e)))?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .map_err(|e| RagError::vector_store(format!("Failed to create table: {}", e)))?;
        }

        tracing::debug!("Upserted {} vectors into {:?}", records.len(), self.path);
        Ok(records.len())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        if top_k == 0 || !self.table_exists().await? {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;

        let stream = table
            .vector_search(embedding.to_vec())
            .map_err(|e| RagError::vector_store(format!("Failed to create vector search: {}", e)))?
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to execute vector search: {}", e)))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to read search results: {}", e)))?;

        let mut matches = Vec::new();

        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let texts = string_column(&batch, "text")?;
            let metadata = string_column(&batch, "metadata")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RagError::vector_store("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let metadata: ChunkMetadata = serde_json::from_str(metadata.value(i))?;
                matches.push(VectorMatch {
                    id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    score: distance_to_similarity(distances.value(i)),
                    metadata,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matches)
    }

    async fn describe(&self) -> Result<IndexStats> {
        if !self.table_exists().await? {
            return Ok(IndexStats {
                dimension: Some(self.dimension),
                total_vector_count: 0,
            });
        }

        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to count rows: {}", e)))?;

        Ok(IndexStats {
            dimension: Some(self.dimension),
            total_vector_count: count,
        })
    }

    fn descriptor(&self) -> String {
        format!("lance:{}", self.path.display())
    }
}

// ============================================================================
// Tests
// ============================================================================
