//! In-memory [`Store`] implementation for testing.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock` for thread safety.
//! Pipelines are interpreted stage by stage over JSON rows built from the
//! logical record layout, so the same request the SQLite backend compiles
//! to SQL can be checked here without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{AggregatedRow, ChunkFilter, ChunkRecord, SourceStats, Total};

use super::{execute_map_reduce, MapReduceRequest, Pipeline, Stage, Store};

const GROUP_ID: &str = "_id";
const GROUP_COUNT: &str = "count";

struct StoredRecord {
    record: ChunkRecord,
    imported_at: i64,
}

/// In-memory store for tests and dry runs.
pub struct InMemoryStore {
    records: RwLock<Vec<StoredRecord>>,
    collections: RwLock<HashMap<String, Vec<AggregatedRow>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of chunk records currently held.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace_collection(&self, name: &str, mut rows: Vec<AggregatedRow>) {
        rows.sort_by(|a, b| a.word.cmp(&b.word));
        self.collections
            .write()
            .unwrap()
            .insert(name.to_string(), rows);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'v>(row: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(row, |v, key| v.get(key))
}

fn row_matches(filter: &ChunkFilter, row: &Value) -> bool {
    let field_is = |field: &str, expected: &Option<String>| match expected {
        Some(want) => row.get(field).and_then(Value::as_str) == Some(want.as_str()),
        None => true,
    };
    field_is("source", &filter.source) && field_is("instanceId", &filter.instance_id)
}

fn apply_stage(stage: &Stage, rows: Vec<Value>) -> Result<Vec<Value>> {
    let rows = match stage {
        Stage::Match(filter) => rows.into_iter().filter(|r| row_matches(filter, r)).collect(),
        Stage::Project { fields } => rows
            .into_iter()
            .map(|row| {
                let kept: Map<String, Value> = fields
                    .iter()
                    .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                Value::Object(kept)
            })
            .collect(),
        Stage::Unwind { field } => rows
            .into_iter()
            .flat_map(|row| {
                let elements = match row.get(field) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                elements.into_iter().map(move |item| {
                    let mut unwound = row.clone();
                    unwound[field.as_str()] = item;
                    unwound
                })
            })
            .collect(),
        Stage::Group { key, sum } => {
            let mut groups: BTreeMap<String, i64> = BTreeMap::new();
            for row in &rows {
                // Rows without a string key are not words.
                let Some(k) = lookup(row, key).and_then(Value::as_str) else {
                    continue;
                };
                let add = lookup(row, sum).and_then(Value::as_i64).ok_or_else(|| {
                    Error::UnsupportedPipeline(format!(
                        "group sum field '{}' is not an integer in {}",
                        sum, row
                    ))
                })?;
                *groups.entry(k.to_string()).or_insert(0) += add;
            }
            groups
                .into_iter()
                .map(|(k, total)| {
                    let mut grouped = Map::new();
                    grouped.insert(GROUP_ID.to_string(), Value::from(k));
                    grouped.insert(GROUP_COUNT.to_string(), Value::from(total));
                    Value::Object(grouped)
                })
                .collect()
        }
        Stage::Out { .. } => rows,
    };
    Ok(rows)
}

fn grouped_row(row: &Value) -> Result<AggregatedRow> {
    let word = row.get(GROUP_ID).and_then(Value::as_str);
    let count = row.get(GROUP_COUNT).and_then(Value::as_i64);
    match (word, count) {
        (Some(word), Some(count)) => Ok(AggregatedRow {
            word: word.to_string(),
            total: Total::Int(count),
        }),
        _ => Err(Error::UnsupportedPipeline(format!(
            "output rows must be grouped word counts, got {}",
            row
        ))),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_one(&self, record: &ChunkRecord) -> Result<()> {
        self.records.write().unwrap().push(StoredRecord {
            record: record.clone(),
            imported_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn delete_many(&self, filter: &ChunkFilter) -> Result<u64> {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|s| !filter.matches(&s.record));
        Ok((before - records.len()) as u64)
    }

    async fn find(&self, filter: &ChunkFilter) -> Result<Vec<ChunkRecord>> {
        let records = self.records.read().unwrap();
        let mut found: Vec<ChunkRecord> = records
            .iter()
            .filter(|s| filter.matches(&s.record))
            .map(|s| s.record.clone())
            .collect();
        found.sort_by(|a, b| {
            (&a.source, &a.instance_id, a.chunk_index).cmp(&(
                &b.source,
                &b.instance_id,
                b.chunk_index,
            ))
        });
        Ok(found)
    }

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let (body, destination) = pipeline.split_output()?;

        let mut rows = {
            let records = self.records.read().unwrap();
            records
                .iter()
                .map(|s| serde_json::to_value(&s.record))
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for stage in body {
            rows = apply_stage(stage, rows)?;
        }

        let output = rows.iter().map(grouped_row).collect::<Result<Vec<_>>>()?;
        self.replace_collection(destination, output);
        Ok(())
    }

    async fn run_map_reduce(&self, request: &MapReduceRequest) -> Result<()> {
        if request.destination.is_empty() {
            return Err(Error::InvalidArgument(
                "map-reduce destination collection is empty".into(),
            ));
        }
        let output = {
            let records = self.records.read().unwrap();
            execute_map_reduce(records.iter().map(|s| &s.record), request)
        };
        self.replace_collection(&request.destination, output);
        Ok(())
    }

    async fn read_collection(&self, name: &str) -> Result<Vec<AggregatedRow>> {
        Ok(self
            .collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn stats(&self) -> Result<Vec<SourceStats>> {
        let records = self.records.read().unwrap();
        let mut by_stream: BTreeMap<(String, Option<String>), SourceStats> = BTreeMap::new();
        for s in records.iter() {
            let key = (s.record.source.clone(), s.record.instance_id.clone());
            let entry = by_stream.entry(key).or_insert_with(|| SourceStats {
                source: s.record.source.clone(),
                instance_id: s.record.instance_id.clone(),
                chunk_count: 0,
                word_total: 0,
                last_import_ts: None,
            });
            entry.chunk_count += 1;
            entry.word_total += s.record.total_words();
            entry.last_import_ts = entry.last_import_ts.max(Some(s.imported_at));
        }
        Ok(by_stream.into_values().collect())
    }
}
