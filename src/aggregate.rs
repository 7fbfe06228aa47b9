//! Word totals across all chunks of a source.
//!
//! Two interchangeable strategies compute the same `word → total` collection:
//!
//! | Strategy | Store engine | Total type |
//! |----------|--------------|------------|
//! | [`Strategy::Pipeline`] | declarative pipeline (match, project, unwind, group, out) | integer |
//! | [`Strategy::MapReduce`] | emit `(word, cnt)` per record, sum per key | float |
//!
//! Aggregation selects chunks by `source` only; records of every instance id
//! are merged.

use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{Error, Result};
use crate::models::{ChunkFilter, ChunkRecord};
use crate::store::{MapReduceRequest, Mapper, Pipeline, Reducer, Stage, Store};

const WORDS_FIELD: &str = "words";
const WORD_PATH: &str = "words.word";
const COUNT_PATH: &str = "words.cnt";

/// How the store computes the aggregated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Pipeline,
    MapReduce,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Pipeline => "aggregate",
            Strategy::MapReduce => "map-reduce",
        }
    }

    /// Replace `destination` with the word totals of `source`.
    ///
    /// Returns the wall-clock time spent inside the store.
    pub async fn aggregate(
        &self,
        store: &dyn Store,
        source: &str,
        destination: &str,
    ) -> Result<Duration> {
        if destination.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "destination collection name is empty".into(),
            ));
        }

        let started = Instant::now();
        match self {
            Strategy::Pipeline => {
                store
                    .run_pipeline(&word_count_pipeline(source, destination))
                    .await?
            }
            Strategy::MapReduce => {
                store
                    .run_map_reduce(&word_count_map_reduce(source, destination))
                    .await?
            }
        }
        let elapsed = started.elapsed();

        info!(
            strategy = self.name(),
            source,
            destination,
            elapsed_ms = elapsed.as_millis() as u64,
            "aggregation finished"
        );
        Ok(elapsed)
    }
}

/// `match source → project words → unwind words → group by word → out`.
pub fn word_count_pipeline(source: &str, destination: &str) -> Pipeline {
    Pipeline::new(vec![
        Stage::Match(ChunkFilter::by_source(source)),
        Stage::Project {
            fields: vec![WORDS_FIELD.to_string()],
        },
        Stage::Unwind {
            field: WORDS_FIELD.to_string(),
        },
        Stage::Group {
            key: WORD_PATH.to_string(),
            sum: COUNT_PATH.to_string(),
        },
        Stage::Out {
            collection: destination.to_string(),
        },
    ])
}

pub fn word_count_map_reduce(source: &str, destination: &str) -> MapReduceRequest {
    MapReduceRequest {
        mapper: Box::new(EmitWordCounts),
        reducer: Box::new(SumValues),
        filter: ChunkFilter::by_source(source),
        destination: destination.to_string(),
    }
}

/// Emits every `(word, cnt)` pair of a chunk record.
pub struct EmitWordCounts;

impl Mapper for EmitWordCounts {
    fn map(&self, record: &ChunkRecord, emit: &mut dyn FnMut(&str, f64)) {
        for w in &record.words {
            emit(&w.word, w.cnt as f64);
        }
    }
}

pub struct SumValues;

impl Reducer for SumValues {
    fn reduce(&self, _key: &str, values: &[f64]) -> f64 {
        values.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::Importer;
    use crate::models::{sort_by_total, AggregatedRow, Total, WordCount};
    use crate::store::memory::InMemoryStore;

    const SOURCE: &str = "dump.txt";

    fn chunk(index: i64, id: Option<&str>, words: &[(&str, i64)]) -> ChunkRecord {
        ChunkRecord {
            source: SOURCE.to_string(),
            instance_id: id.map(str::to_string),
            chunk_index: index,
            chunk_capacity: 1,
            words: words.iter().map(|(w, c)| WordCount::new(*w, *c)).collect(),
        }
    }

    async fn fixture_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let records = [
            chunk(0, None, &[("mongo", 2), ("is", 2), ("awesome", 2)]),
            chunk(1, None, &[("floow", 1), ("is", 1), ("awesome", 1)]),
            chunk(2, None, &[("i", 1), ("am", 1), ("awesome", 1), ("too", 1)]),
        ];
        for r in &records {
            store.insert_one(r).await.unwrap();
        }
        store
            .insert_one(&ChunkRecord {
                source: "unrelated.txt".into(),
                ..chunk(0, None, &[("awesome", 50)])
            })
            .await
            .unwrap();
        store
    }

    fn ranked(mut rows: Vec<AggregatedRow>) -> Vec<(String, f64)> {
        sort_by_total(&mut rows);
        rows.into_iter().map(|r| (r.word, r.total.as_f64())).collect()
    }

    fn expected_fixture_totals() -> Vec<(String, f64)> {
        [
            ("awesome", 4.0),
            ("is", 3.0),
            ("mongo", 2.0),
            ("am", 1.0),
            ("floow", 1.0),
            ("i", 1.0),
            ("too", 1.0),
        ]
        .iter()
        .map(|(w, c)| (w.to_string(), *c))
        .collect()
    }

    #[test]
    fn pipeline_request_shape() {
        let pipeline = word_count_pipeline(SOURCE, "words_aggr");
        assert_eq!(pipeline.stages.len(), 5);
        assert_eq!(
            pipeline.stages[0],
            Stage::Match(ChunkFilter::by_source(SOURCE))
        );
        assert_eq!(
            pipeline.stages[3],
            Stage::Group {
                key: "words.word".into(),
                sum: "words.cnt".into()
            }
        );
        let (_, out) = pipeline.split_output().unwrap();
        assert_eq!(out, "words_aggr");
    }

    #[tokio::test]
    async fn pipeline_produces_integer_totals() {
        let store = fixture_store().await;
        Strategy::Pipeline
            .aggregate(&store, SOURCE, "words_aggr")
            .await
            .unwrap();

        let rows = store.read_collection("words_aggr").await.unwrap();
        assert!(rows.iter().all(|r| matches!(r.total, Total::Int(_))));
        assert_eq!(ranked(rows), expected_fixture_totals());
    }

    #[tokio::test]
    async fn map_reduce_produces_float_totals() {
        let store = fixture_store().await;
        Strategy::MapReduce
            .aggregate(&store, SOURCE, "words_mr")
            .await
            .unwrap();

        let rows = store.read_collection("words_mr").await.unwrap();
        assert!(rows.iter().all(|r| matches!(r.total, Total::Float(_))));
        assert_eq!(ranked(rows), expected_fixture_totals());
    }

    #[tokio::test]
    async fn strategies_agree_on_imported_data() {
        let store = InMemoryStore::new();
        let text = "I am awesome too\nmongo is awesome\nfloow is awesome\n";
        Importer::new(SOURCE, None, &store)
            .import_in_chunks(text.as_bytes(), 0, 0, 2)
            .await
            .unwrap();

        Strategy::Pipeline
            .aggregate(&store, SOURCE, "p")
            .await
            .unwrap();
        Strategy::MapReduce
            .aggregate(&store, SOURCE, "m")
            .await
            .unwrap();

        let p = store.read_collection("p").await.unwrap();
        let m = store.read_collection("m").await.unwrap();
        assert_eq!(p.len(), 7);
        assert_eq!(p.len(), m.len());
        for (a, b) in p.iter().zip(m.iter()) {
            assert_eq!(a.word, b.word);
            assert!(a.total.same_value(&b.total), "{}: {} vs {}", a.word, a.total, b.total);
        }

        let awesome = p.iter().find(|r| r.word == "awesome").unwrap();
        assert_eq!(awesome.total, Total::Int(3));
        let is = p.iter().find(|r| r.word == "is").unwrap();
        assert_eq!(is.total, Total::Int(2));
    }

    #[tokio::test]
    async fn instances_are_merged_by_source() {
        let store = InMemoryStore::new();
        store
            .insert_one(&chunk(0, Some("host1"), &[("is", 1)]))
            .await
            .unwrap();
        store
            .insert_one(&chunk(0, Some("host2"), &[("is", 2)]))
            .await
            .unwrap();
        store.insert_one(&chunk(0, None, &[("is", 4)])).await.unwrap();

        for strategy in [Strategy::Pipeline, Strategy::MapReduce] {
            strategy.aggregate(&store, SOURCE, "out").await.unwrap();
            let rows = store.read_collection("out").await.unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].total.as_f64(), 7.0);
        }
    }

    #[tokio::test]
    async fn unknown_source_yields_empty_collection() {
        let store = fixture_store().await;
        for strategy in [Strategy::Pipeline, Strategy::MapReduce] {
            strategy.aggregate(&store, SOURCE, "out").await.unwrap();
            strategy.aggregate(&store, "nope.txt", "out").await.unwrap();
            assert!(store.read_collection("out").await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn empty_destination_is_rejected() {
        let store = fixture_store().await;
        let err = Strategy::Pipeline
            .aggregate(&store, SOURCE, " ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
