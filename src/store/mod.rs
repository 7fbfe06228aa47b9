//! Storage abstraction for wordchunk.
//!
//! The [`Store`] trait is the capability the importer and the aggregation
//! strategies drive: inserting and deleting chunk records, and executing
//! declarative [`Pipeline`] and [`MapReduceRequest`] computations whose
//! output replaces a named result collection.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Backend | Module |
//! |---------|--------|
//! | SQLite (sqlx) | [`sqlite`] |
//! | In-memory | [`memory`] |

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{AggregatedRow, ChunkFilter, ChunkRecord, SourceStats, Total};

/// One stage of a declarative aggregation pipeline.
///
/// Field names refer to the logical record layout (`source`, `instanceId`,
/// `words`, ...); nested fields use dotted paths such as `words.word`.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep only records matching the filter.
    Match(ChunkFilter),
    /// Keep only the listed top-level fields.
    Project { fields: Vec<String> },
    /// Replace each row by one row per element of an array field.
    Unwind { field: String },
    /// Group rows by `key`, summing the integer at `sum`.
    Group { key: String, sum: String },
    /// Materialize the grouped rows into a collection, replacing its contents.
    Out { collection: String },
}

/// An ordered sequence of stages ending with exactly one [`Stage::Out`].
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Split off the terminal `Out` stage, rejecting malformed pipelines.
    pub fn split_output(&self) -> Result<(&[Stage], &str)> {
        match self.stages.split_last() {
            Some((Stage::Out { collection }, body)) => {
                if body.iter().any(|s| matches!(s, Stage::Out { .. })) {
                    return Err(Error::UnsupportedPipeline(
                        "only the last stage may be an output stage".into(),
                    ));
                }
                if collection.is_empty() {
                    return Err(Error::UnsupportedPipeline(
                        "output collection name is empty".into(),
                    ));
                }
                Ok((body, collection.as_str()))
            }
            _ => Err(Error::UnsupportedPipeline(
                "pipeline must end with an output stage".into(),
            )),
        }
    }
}

/// Per-record emission rule of a map-reduce computation.
pub trait Mapper: Send + Sync {
    fn map(&self, record: &ChunkRecord, emit: &mut dyn FnMut(&str, f64));
}

/// Per-key reduction rule of a map-reduce computation.
///
/// Only called for keys with more than one emitted value; a single value is
/// written through unchanged.
pub trait Reducer: Send + Sync {
    fn reduce(&self, key: &str, values: &[f64]) -> f64;
}

/// A map-reduce computation over the chunk records matching `filter`.
pub struct MapReduceRequest {
    pub mapper: Box<dyn Mapper>,
    pub reducer: Box<dyn Reducer>,
    pub filter: ChunkFilter,
    pub destination: String,
}

impl std::fmt::Debug for MapReduceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapReduceRequest")
            .field("filter", &self.filter)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Incremental map phase of a [`MapReduceRequest`].
///
/// Backends feed matching records one at a time and call
/// [`finish`](MapReduceRun::finish) to reduce. Keys come back in order.
pub struct MapReduceRun<'a> {
    request: &'a MapReduceRequest,
    emitted: BTreeMap<String, Vec<f64>>,
}

impl<'a> MapReduceRun<'a> {
    pub fn new(request: &'a MapReduceRequest) -> Self {
        Self {
            request,
            emitted: BTreeMap::new(),
        }
    }

    /// Map one record; records outside the request filter are ignored.
    pub fn feed(&mut self, record: &ChunkRecord) {
        if !self.request.filter.matches(record) {
            return;
        }
        let emitted = &mut self.emitted;
        self.request.mapper.map(record, &mut |key, value| {
            emitted.entry(key.to_string()).or_default().push(value);
        });
    }

    pub fn finish(self) -> Vec<AggregatedRow> {
        let reducer = &self.request.reducer;
        self.emitted
            .into_iter()
            .map(|(word, values)| {
                let value = match values.as_slice() {
                    [single] => *single,
                    _ => reducer.reduce(&word, &values),
                };
                AggregatedRow {
                    word,
                    total: Total::Float(value),
                }
            })
            .collect()
    }
}

/// Run the map and reduce phases over `records` in one go.
pub fn execute_map_reduce<'r>(
    records: impl IntoIterator<Item = &'r ChunkRecord>,
    request: &MapReduceRequest,
) -> Vec<AggregatedRow> {
    let mut run = MapReduceRun::new(request);
    for record in records {
        run.feed(record);
    }
    run.finish()
}

/// Abstract storage backend for wordchunk.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_one`](Store::insert_one) | Persist one chunk record |
/// | [`delete_many`](Store::delete_many) | Delete every record matching a filter |
/// | [`find`](Store::find) | Read records matching a filter |
/// | [`run_pipeline`](Store::run_pipeline) | Execute a pipeline into a result collection |
/// | [`run_map_reduce`](Store::run_map_reduce) | Execute map-reduce into a result collection |
/// | [`read_collection`](Store::read_collection) | Read a result collection |
/// | [`stats`](Store::stats) | Per-stream chunk summary |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_one(&self, record: &ChunkRecord) -> Result<()>;

    /// Returns the number of deleted records.
    async fn delete_many(&self, filter: &ChunkFilter) -> Result<u64>;

    /// Records ordered by source, instance id and chunk index.
    async fn find(&self, filter: &ChunkFilter) -> Result<Vec<ChunkRecord>>;

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<()>;

    async fn run_map_reduce(&self, request: &MapReduceRequest) -> Result<()>;

    /// Rows of a result collection ordered by word; empty if it does not exist.
    async fn read_collection(&self, name: &str) -> Result<Vec<AggregatedRow>>;

    async fn stats(&self) -> Result<Vec<SourceStats>>;
}
