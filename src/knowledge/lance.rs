//! LanceDB Vector Index - 영속 벡터 인덱스
//!
//! 세대마다 별도 테이블(`<collection>_g<N>`)을 만들고, 어느 테이블이 활성인지는
//! JSON 매니페스트에 기록합니다. 새 세대 발행은 매니페스트 교체(임시 파일 + rename)로
//! 이루어지며, 직전 세대 테이블은 다음 발행 때까지 보존됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::vector::{
    check_dimensions, rank_candidates, Candidate, IndexEntry, RetrievedChunk, VectorIndex,
};
use crate::error::{RagError, Result};

// ============================================================================
// Manifest
// ============================================================================

/// 컬렉션의 발행 상태
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    collection: String,
    /// 현재 세대 번호
    generation: u64,
    /// 현재 세대 테이블 (첫 쓰기 전에는 None)
    active_table: Option<String>,
    /// 직전 세대 테이블 (진행 중인 검색용으로 보존)
    previous_table: Option<String>,
    /// 현재 세대 벡터 차원
    dimension: Option<usize>,
    /// 다음 삽입 순번
    next_seq: u64,
    updated_at: Option<DateTime<Utc>>,
}

fn index_err<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> RagError {
    move |e| RagError::Index(format!("{}: {}", context, e))
}

// ============================================================================
// LanceIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
pub struct LanceIndex {
    db: Connection,
    manifest_path: PathBuf,
    collection: String,
    /// 읽기 락은 검색 동안 유지되어 발행과 겹치지 않음
    state: RwLock<Manifest>,
    /// 쓰기 직렬화
    writer: Mutex<()>,
}

impl LanceIndex {
    /// LanceDB 인덱스 열기
    ///
    /// # Arguments
    /// * `path` - 인덱스 디렉토리
    /// * `collection` - 컬렉션 이름
    pub async fn open(path: &Path, collection: &str) -> Result<Self> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(index_err("Failed to create index directory"))?;

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Index(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(index_err("Failed to connect to LanceDB"))?;

        let manifest_path = path.join(format!("{}.manifest.json", collection));
        let mut manifest = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(raw) => serde_json::from_str::<Manifest>(&raw)
                .map_err(index_err("Corrupt index manifest"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest {
                collection: collection.to_string(),
                ..Default::default()
            },
            Err(e) => return Err(index_err("Failed to read index manifest")(e)),
        };

        // 매니페스트가 가리키는 테이블이 사라졌으면 빈 세대로 취급
        if let Some(active) = manifest.active_table.clone() {
            let names = db
                .table_names()
                .execute()
                .await
                .map_err(index_err("Failed to list tables"))?;
            if !names.contains(&active) {
                tracing::warn!("Active table {} missing, starting empty generation", active);
                manifest.active_table = None;
                manifest.dimension = None;
                manifest.next_seq = 0;
            }
        }

        tracing::debug!(
            "Opened index {} at generation {} ({:?})",
            collection,
            manifest.generation,
            manifest.active_table
        );

        Ok(Self {
            db,
            manifest_path,
            collection: collection.to_string(),
            state: RwLock::new(manifest),
            writer: Mutex::new(()),
        })
    }

    /// 현재 세대 번호
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    fn table_name(&self, generation: u64) -> String {
        format!("{}_g{}", self.collection, generation)
    }

    /// 인덱스 테이블 스키마
    fn schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("seq", DataType::Int64, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// (순번, 엔트리)들을 Arrow RecordBatch로 변환
    fn entries_to_batch(entries: &[(u64, IndexEntry)], dimension: usize) -> Result<RecordBatch> {
        let ids: Vec<&str> = entries.iter().map(|(_, e)| e.id.as_str()).collect();
        let seqs: Vec<i64> = entries.iter().map(|(seq, _)| *seq as i64).collect();
        let contents: Vec<&str> = entries.iter().map(|(_, e)| e.content.as_str()).collect();
        let metadata: Vec<String> = entries
            .iter()
            .map(|(_, e)| serde_json::to_string(&e.metadata))
            .collect::<std::result::Result<_, _>>()
            .map_err(index_err("Failed to serialize metadata"))?;

        let values: Vec<f32> = entries
            .iter()
            .flat_map(|(_, e)| e.vector.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension as i32,
            Arc::new(Float32Array::from(values)) as Arc<dyn Array>,
            None,
        )
        .map_err(index_err("Failed to create vector array"))?;

        RecordBatch::try_new(
            Arc::new(Self::schema(dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(Int64Array::from(seqs)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(vectors),
            ],
        )
        .map_err(index_err("Failed to create RecordBatch"))
    }

    /// 새 테이블 생성 (충돌하는 잔여 테이블은 먼저 삭제)
    async fn create_table(&self, name: &str, batch: RecordBatch) -> Result<()> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(index_err("Failed to list tables"))?;
        if names.iter().any(|n| n == name) {
            tracing::warn!("Dropping leftover table {}", name);
            self.db
                .drop_table(name)
                .await
                .map_err(index_err("Failed to drop leftover table"))?;
        }

        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(name, batches)
            .execute()
            .await
            .map_err(index_err("Failed to create table"))?;
        Ok(())
    }

    async fn open_table(&self, name: &str) -> Result<lancedb::table::Table> {
        self.db
            .open_table(name)
            .execute()
            .await
            .map_err(index_err("Failed to open table"))
    }

    /// 이미 저장된 id들의 삽입 순번 조회
    async fn existing_seqs(
        &self,
        table: &lancedb::table::Table,
        ids: &[&str],
    ) -> Result<HashMap<String, u64>> {
        let stream = table
            .query()
            .only_if(id_filter(ids))
            .limit(ids.len())
            .execute()
            .await
            .map_err(index_err("Failed to query existing ids"))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(index_err("Failed to read existing ids"))?;

        let mut seqs = HashMap::new();
        for batch in batches {
            let id_col = column::<StringArray>(&batch, "id")?;
            let seq_col = column::<Int64Array>(&batch, "seq")?;
            for i in 0..batch.num_rows() {
                seqs.insert(id_col.value(i).to_string(), seq_col.value(i) as u64);
            }
        }
        Ok(seqs)
    }

    /// 매니페스트 저장 후 상태 교체, 더 이상 필요 없는 테이블 삭제
    async fn publish(&self, mut next: Manifest, obsolete: Option<String>) -> Result<()> {
        next.updated_at = Some(Utc::now());

        let raw = serde_json::to_string_pretty(&next)
            .map_err(index_err("Failed to serialize manifest"))?;
        let tmp_path = self.manifest_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw)
            .await
            .map_err(index_err("Failed to write manifest"))?;
        tokio::fs::rename(&tmp_path, &self.manifest_path)
            .await
            .map_err(index_err("Failed to replace manifest"))?;

        let generation = next.generation;
        *self.state.write().await = next;

        if let Some(name) = obsolete {
            if let Err(e) = self.db.drop_table(&name).await {
                tracing::warn!("Failed to drop obsolete table {}: {}", name, e);
            }
        }

        tracing::debug!("Published {} generation {}", self.collection, generation);
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let _writer = self.writer.lock().await;
        let mut next = self.state.read().await.clone();

        let dimension = check_dimensions(next.dimension, &entries)?
            .ok_or_else(|| RagError::Index("cannot infer vector dimension".to_string()))?;
        let entries = dedupe(entries);
        let count = entries.len();

        let table = match &next.active_table {
            Some(name) => Some(self.open_table(name).await?),
            None => None,
        };

        let existing = match &table {
            Some(table) => {
                let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
                self.existing_seqs(table, &ids).await?
            }
            None => HashMap::new(),
        };

        let sequenced: Vec<(u64, IndexEntry)> = entries
            .into_iter()
            .map(|entry| {
                let seq = existing.get(&entry.id).copied().unwrap_or_else(|| {
                    let seq = next.next_seq;
                    next.next_seq += 1;
                    seq
                });
                (seq, entry)
            })
            .collect();
        let batch = Self::entries_to_batch(&sequenced, dimension)?;

        match table {
            Some(table) => {
                // 덮어쓰기와 추가를 한 버전으로 커밋 (검색은 이전 버전 또는 새 버전만 봄)
                let schema = batch.schema();
                let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema));
                let mut merge = table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all();
                merge
                    .execute(reader)
                    .await
                    .map_err(index_err("Failed to merge entries"))?;
            }
            None => {
                let name = self.table_name(next.generation);
                self.create_table(&name, batch).await?;
                next.active_table = Some(name);
            }
        }

        next.dimension = Some(dimension);
        self.publish(next, None).await?;
        Ok(count)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let state = self.state.read().await;

        let (Some(table_name), Some(dimension)) = (&state.active_table, state.dimension) else {
            return Ok(vec![]);
        };
        if query.len() != dimension {
            return Err(RagError::dimension_mismatch(dimension, query.len()));
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let table = self.open_table(table_name).await?;
        let stream = table
            .vector_search(query.to_vec())
            .map_err(index_err("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(index_err("Failed to execute vector search"))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(index_err("Failed to read search results"))?;

        let mut candidates = Vec::new();
        for batch in batches {
            let seqs = column::<Int64Array>(&batch, "seq")?;
            let contents = column::<StringArray>(&batch, "content")?;
            let metadata = column::<StringArray>(&batch, "metadata")?;
            // _distance 컬럼 (LanceDB가 자동 추가, cosine distance = 1 - similarity)
            let distances = column::<Float32Array>(&batch, "_distance")?;

            for i in 0..batch.num_rows() {
                candidates.push(Candidate {
                    seq: seqs.value(i) as u64,
                    chunk: RetrievedChunk {
                        content: contents.value(i).to_string(),
                        metadata: serde_json::from_str(metadata.value(i))
                            .map_err(index_err("Corrupt chunk metadata"))?,
                        score: 1.0 - distances.value(i),
                    },
                });
            }
        }

        Ok(rank_candidates(candidates, k, min_score))
    }

    async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let current = self.state.read().await.clone();

        let next = Manifest {
            collection: self.collection.clone(),
            generation: current.generation + 1,
            active_table: None,
            previous_table: current.active_table.clone(),
            dimension: None,
            next_seq: 0,
            updated_at: None,
        };

        tracing::info!("Cleared {} (generation {})", self.collection, next.generation);
        self.publish(next, current.previous_table).await
    }

    async fn replace_all(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let current = self.state.read().await.clone();

        let dimension = check_dimensions(None, &entries)?;
        let entries = dedupe(entries);
        let count = entries.len();
        let generation = current.generation + 1;

        // 새 세대 테이블을 완성한 뒤에만 발행
        let active_table = match dimension {
            Some(dimension) if count > 0 => {
                let sequenced: Vec<(u64, IndexEntry)> =
                    entries.into_iter().enumerate().map(|(i, e)| (i as u64, e)).collect();
                let batch = Self::entries_to_batch(&sequenced, dimension)?;
                let name = self.table_name(generation);
                self.create_table(&name, batch).await?;
                Some(name)
            }
            _ => None,
        };

        let next = Manifest {
            collection: self.collection.clone(),
            generation,
            active_table,
            previous_table: current.active_table.clone(),
            dimension,
            next_seq: count as u64,
            updated_at: None,
        };

        self.publish(next, current.previous_table).await?;
        tracing::info!(
            "Published {} generation {} with {} entries",
            self.collection,
            generation,
            count
        );
        Ok(count)
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.read().await;
        let Some(name) = &state.active_table else {
            return Ok(0);
        };

        let table = self.open_table(name).await?;
        table
            .count_rows(None)
            .await
            .map_err(index_err("Failed to count rows"))
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.state.read().await.dimension)
    }

    fn name(&self) -> &'static str {
        "lancedb"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 배치 내 중복 id 제거 (마지막 값 사용, 위치는 처음 등장 순서)
fn dedupe(entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<IndexEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match positions.get(&entry.id) {
            Some(&pos) => result[pos] = entry,
            None => {
                positions.insert(entry.id.clone(), result.len());
                result.push(entry);
            }
        }
    }

    result
}

/// `id IN (...)` 필터 (작은따옴표 이스케이프)
fn id_filter(ids: &[&str]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect();
    format!("id IN ({})", quoted.join(", "))
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| RagError::Index(format!("Missing {} column", name)))
}

// ============================================================================
// Tests
// ============================================================================
