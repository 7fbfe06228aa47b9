//! SQLite-backed [`Store`] implementation.
//!
//! Chunk records live in `chunk_records`, one row per record, with the word
//! counts kept as a JSON array. Pipelines are compiled into a single
//! `INSERT ... SELECT` over `json_each`; map-reduce requests page through
//! the matching records inside one read transaction and run the shared
//! [`MapReduceRun`] engine. Both
//! materialize their output inside one transaction.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{AggregatedRow, ChunkFilter, ChunkRecord, SourceStats, Total, WordCount};

use super::{MapReduceRequest, MapReduceRun, Pipeline, Stage, Store};

const PAGE_SIZE: i64 = 500;

/// SQLite implementation of the [`Store`] trait.
///
/// Bound to one chunk collection name; several collections can share a
/// database file.
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, config.db.collection.clone()))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Names and row counts of every aggregated collection in the database.
    pub async fn output_collections(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT collection, COUNT(*) AS words FROM aggregated_results \
             GROUP BY collection ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::StoreUnavailable)?;

        Ok(rows
            .iter()
            .map(|row| (row.get("collection"), row.get("words")))
            .collect())
    }

    async fn replace_with_rows(&self, destination: &str, rows: &[AggregatedRow]) -> Result<()> {
        let context = format!("writing collection '{}'", destination);
        let mut tx = self.pool.begin().await.map_err(Error::StoreUnavailable)?;

        sqlx::query("DELETE FROM aggregated_results WHERE collection = ?")
            .bind(destination)
            .execute(&mut *tx)
            .await
            .map_err(Error::write(context.clone()))?;

        for row in rows {
            let (total_int, total_real) = match row.total {
                Total::Int(n) => (Some(n), None),
                Total::Float(f) => (None, Some(f)),
            };
            sqlx::query(
                "INSERT INTO aggregated_results (collection, word, total_int, total_real) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(destination)
            .bind(&row.word)
            .bind(total_int)
            .bind(total_real)
            .execute(&mut *tx)
            .await
            .map_err(Error::write(context.clone()))?;
        }

        tx.commit().await.map_err(Error::write(context))?;
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ChunkRecord> {
    let words_json: String = row.get("words_json");
    let words: Vec<WordCount> = serde_json::from_str(&words_json)?;
    Ok(ChunkRecord {
        source: row.get("source"),
        instance_id: row.get("instance_id"),
        chunk_index: row.get("chunk_index"),
        chunk_capacity: row.get("chunk_capacity"),
        words,
    })
}

/// Combine consecutive match stages. `None` when they contradict each other.
fn merge_filters(filters: &[&ChunkFilter]) -> Option<ChunkFilter> {
    fn merge_field(acc: &mut Option<String>, next: &Option<String>) -> bool {
        match (acc.as_ref(), next) {
            (_, None) => true,
            (None, Some(v)) => {
                *acc = Some(v.clone());
                true
            }
            (Some(a), Some(b)) => a == b,
        }
    }

    let mut merged = ChunkFilter::all();
    for f in filters {
        if !merge_field(&mut merged.source, &f.source)
            || !merge_field(&mut merged.instance_id, &f.instance_id)
        {
            return None;
        }
    }
    Some(merged)
}

/// Check that a pipeline body is the word-count shape this backend compiles:
/// `Match* → Project(words)? → Unwind(words) → Group(words.word, words.cnt)`.
///
/// Returns the merged match filter, or `None` if no record can match.
fn compile_word_count_pipeline(body: &[Stage]) -> Result<Option<ChunkFilter>> {
    let unsupported = |stage: &Stage| {
        Error::UnsupportedPipeline(format!("stage {:?} is not supported here", stage))
    };

    let mut filters = Vec::new();
    let mut rest = body;
    while let Some((Stage::Match(filter), tail)) = rest.split_first() {
        filters.push(filter);
        rest = tail;
    }
    if let Some((Stage::Project { fields }, tail)) = rest.split_first() {
        if !fields.iter().any(|f| f == "words") {
            return Err(Error::UnsupportedPipeline(
                "projection must keep the words field".into(),
            ));
        }
        rest = tail;
    }
    match rest {
        [Stage::Unwind { field }, Stage::Group { key, sum }]
            if field == "words" && key == "words.word" && sum == "words.cnt" =>
        {
            Ok(merge_filters(&filters))
        }
        [] => Err(Error::UnsupportedPipeline(
            "pipeline must unwind and group the words field".into(),
        )),
        [first, ..] => Err(unsupported(first)),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_one(&self, record: &ChunkRecord) -> Result<()> {
        let words_json = serde_json::to_string(&record.words)?;
        sqlx::query(
            r#"
            INSERT INTO chunk_records (collection, source, instance_id, chunk_index,
                                       chunk_capacity, words_json, imported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.collection)
        .bind(&record.source)
        .bind(&record.instance_id)
        .bind(record.chunk_index)
        .bind(record.chunk_capacity)
        .bind(&words_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::write(format!(
            "inserting chunk {} of '{}'",
            record.chunk_index, record.source
        )))?;
        Ok(())
    }

    async fn delete_many(&self, filter: &ChunkFilter) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM chunk_records
            WHERE collection = ?1
              AND (?2 IS NULL OR source = ?2)
              AND (?3 IS NULL OR instance_id = ?3)
            "#,
        )
        .bind(&self.collection)
        .bind(&filter.source)
        .bind(&filter.instance_id)
        .execute(&self.pool)
        .await
        .map_err(Error::write("deleting chunk records"))?;
        Ok(result.rows_affected())
    }

    async fn find(&self, filter: &ChunkFilter) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT source, instance_id, chunk_index, chunk_capacity, words_json
            FROM chunk_records
            WHERE collection = ?1
              AND (?2 IS NULL OR source = ?2)
              AND (?3 IS NULL OR instance_id = ?3)
            ORDER BY source, instance_id, chunk_index
            "#,
        )
        .bind(&self.collection)
        .bind(&filter.source)
        .bind(&filter.instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::StoreUnavailable)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let (body, destination) = pipeline.split_output()?;
        let filter = compile_word_count_pipeline(body)?;

        let context = format!("writing collection '{}'", destination);
        let mut tx = self.pool.begin().await.map_err(Error::StoreUnavailable)?;

        sqlx::query("DELETE FROM aggregated_results WHERE collection = ?")
            .bind(destination)
            .execute(&mut *tx)
            .await
            .map_err(Error::write(context.clone()))?;

        if let Some(filter) = filter {
            sqlx::query(
                r#"
                INSERT INTO aggregated_results (collection, word, total_int, total_real)
                SELECT ?1, json_extract(w.value, '$.word') AS word,
                       SUM(json_extract(w.value, '$.cnt')), NULL
                FROM chunk_records c, json_each(c.words_json) w
                WHERE c.collection = ?2
                  AND (?3 IS NULL OR c.source = ?3)
                  AND (?4 IS NULL OR c.instance_id = ?4)
                  AND json_type(w.value, '$.word') = 'text'
                GROUP BY word
                "#,
            )
            .bind(destination)
            .bind(&self.collection)
            .bind(&filter.source)
            .bind(&filter.instance_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::write(context.clone()))?;
        }

        tx.commit().await.map_err(Error::write(context))?;
        Ok(())
    }

    async fn run_map_reduce(&self, request: &MapReduceRequest) -> Result<()> {
        if request.destination.is_empty() {
            return Err(Error::InvalidArgument(
                "map-reduce destination collection is empty".into(),
            ));
        }

        let mut run = MapReduceRun::new(request);
        let mut last_id: i64 = 0;
        // One read transaction so every page comes from the same snapshot.
        let mut tx = self.pool.begin().await.map_err(Error::StoreUnavailable)?;
        loop {
            let rows = sqlx::query(
                r#"
                SELECT id, source, instance_id, chunk_index, chunk_capacity, words_json
                FROM chunk_records
                WHERE collection = ?1
                  AND (?2 IS NULL OR source = ?2)
                  AND (?3 IS NULL OR instance_id = ?3)
                  AND id > ?4
                ORDER BY id
                LIMIT ?5
                "#,
            )
            .bind(&self.collection)
            .bind(&request.filter.source)
            .bind(&request.filter.instance_id)
            .bind(last_id)
            .bind(PAGE_SIZE)
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::StoreUnavailable)?;

            let Some(last) = rows.last() else {
                break;
            };
            last_id = last.get("id");
            for row in &rows {
                run.feed(&record_from_row(row)?);
            }
        }

        tx.commit().await.map_err(Error::StoreUnavailable)?;

        let output = run.finish();
        self.replace_with_rows(&request.destination, &output).await
    }

    async fn read_collection(&self, name: &str) -> Result<Vec<AggregatedRow>> {
        let rows = sqlx::query(
            "SELECT word, total_int, total_real FROM aggregated_results \
             WHERE collection = ? ORDER BY word",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::StoreUnavailable)?;

        Ok(rows
            .iter()
            .map(|row| {
                let total_int: Option<i64> = row.get("total_int");
                let total_real: Option<f64> = row.get("total_real");
                let total = match (total_int, total_real) {
                    (Some(n), _) => Total::Int(n),
                    (None, Some(f)) => Total::Float(f),
                    (None, None) => Total::Int(0),
                };
                AggregatedRow {
                    word: row.get("word"),
                    total,
                }
            })
            .collect())
    }

    async fn stats(&self) -> Result<Vec<SourceStats>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.source,
                c.instance_id,
                COUNT(*) AS chunk_count,
                SUM(COALESCE(
                    (SELECT SUM(json_extract(w.value, '$.cnt')) FROM json_each(c.words_json) w),
                    0
                )) AS word_total,
                MAX(c.imported_at) AS last_import_ts
            FROM chunk_records c
            WHERE c.collection = ?
            GROUP BY c.source, c.instance_id
            ORDER BY c.source, c.instance_id
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::StoreUnavailable)?;

        Ok(rows
            .iter()
            .map(|row| SourceStats {
                source: row.get("source"),
                instance_id: row.get("instance_id"),
                chunk_count: row.get("chunk_count"),
                word_total: row.get("word_total"),
                last_import_ts: row.get("last_import_ts"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn test_store(tmp: &TempDir, collection: &str) -> SqliteStore {
        let path = tmp.path().join("wordchunk.sqlite");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true),
            )
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool, collection)
    }

    fn record(source: &str, id: Option<&str>, index: i64, words: &[(&str, i64)]) -> ChunkRecord {
        ChunkRecord {
            source: source.to_string(),
            instance_id: id.map(str::to_string),
            chunk_index: index,
            chunk_capacity: 2,
            words: words.iter().map(|(w, c)| WordCount::new(*w, *c)).collect(),
        }
    }

    fn word_count_pipeline(source: &str, out: &str) -> Pipeline {
        Pipeline::new(vec![
            Stage::Match(ChunkFilter::by_source(source)),
            Stage::Project {
                fields: vec!["words".into()],
            },
            Stage::Unwind {
                field: "words".into(),
            },
            Stage::Group {
                key: "words.word".into(),
                sum: "words.cnt".into(),
            },
            Stage::Out {
                collection: out.into(),
            },
        ])
    }

    #[tokio::test]
    async fn insert_find_and_delete_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;

        let a0 = record("dump.txt", None, 0, &[("mongo", 2), ("is", 2)]);
        let a1 = record("dump.txt", Some("host1"), 0, &[("floow", 1)]);
        let b0 = record("dump2.txt", None, 0, &[("i", 1)]);
        for r in [&a0, &a1, &b0] {
            store.insert_one(r).await.unwrap();
        }

        let found = store.find(&ChunkFilter::by_source("dump.txt")).await.unwrap();
        assert_eq!(found, vec![a0.clone(), a1.clone()]);

        let deleted = store
            .delete_many(&ChunkFilter::by_stream("dump.txt", Some("host1")))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.find(&ChunkFilter::all()).await.unwrap().len(), 2);

        let deleted = store.delete_many(&ChunkFilter::by_source("dump.txt")).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.find(&ChunkFilter::all()).await.unwrap(), vec![b0]);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let words = test_store(&tmp, "words").await;
        let other = SqliteStore::new(words.pool.clone(), "other");

        words
            .insert_one(&record("dump.txt", None, 0, &[("x", 1)]))
            .await
            .unwrap();
        assert!(other.find(&ChunkFilter::all()).await.unwrap().is_empty());
        assert_eq!(other.delete_many(&ChunkFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pipeline_sums_integers_and_replaces_output() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;
        store
            .insert_one(&record("dump.txt", None, 0, &[("is", 2), ("mongo", 2)]))
            .await
            .unwrap();
        store
            .insert_one(&record("dump.txt", Some("h1"), 0, &[("is", 1)]))
            .await
            .unwrap();
        store
            .insert_one(&record("other.txt", None, 0, &[("is", 9), ("zzz", 1)]))
            .await
            .unwrap();

        store
            .run_pipeline(&word_count_pipeline("other.txt", "words_aggr"))
            .await
            .unwrap();
        store
            .run_pipeline(&word_count_pipeline("dump.txt", "words_aggr"))
            .await
            .unwrap();

        let rows = store.read_collection("words_aggr").await.unwrap();
        assert_eq!(
            rows,
            vec![
                AggregatedRow {
                    word: "is".into(),
                    total: Total::Int(3)
                },
                AggregatedRow {
                    word: "mongo".into(),
                    total: Total::Int(2)
                },
            ]
        );
    }

    #[tokio::test]
    async fn contradictory_matches_produce_empty_output() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;
        store
            .insert_one(&record("dump.txt", None, 0, &[("is", 2)]))
            .await
            .unwrap();

        let mut pipeline = word_count_pipeline("dump.txt", "out");
        pipeline
            .stages
            .insert(0, Stage::Match(ChunkFilter::by_source("else.txt")));
        store.run_pipeline(&pipeline).await.unwrap();
        assert!(store.read_collection("out").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_pipeline_shapes_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;

        let pipeline = Pipeline::new(vec![
            Stage::Match(ChunkFilter::by_source("dump.txt")),
            Stage::Out {
                collection: "out".into(),
            },
        ]);
        assert!(matches!(
            store.run_pipeline(&pipeline).await,
            Err(Error::UnsupportedPipeline(_))
        ));

        let pipeline = Pipeline::new(vec![
            Stage::Unwind {
                field: "words".into(),
            },
            Stage::Group {
                key: "source".into(),
                sum: "words.cnt".into(),
            },
            Stage::Out {
                collection: "out".into(),
            },
        ]);
        assert!(store.run_pipeline(&pipeline).await.is_err());
    }

    #[tokio::test]
    async fn stats_summarize_streams() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;
        store
            .insert_one(&record("dump.txt", None, 0, &[("is", 2), ("x", 1)]))
            .await
            .unwrap();
        store
            .insert_one(&record("dump.txt", None, 1, &[("is", 1)]))
            .await
            .unwrap();
        store
            .insert_one(&record("dump.txt", Some("h1"), 0, &[("y", 5)]))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].instance_id, None);
        assert_eq!(stats[0].chunk_count, 2);
        assert_eq!(stats[0].word_total, 4);
        assert_eq!(stats[1].instance_id.as_deref(), Some("h1"));
        assert_eq!(stats[1].word_total, 5);
        assert!(stats[1].last_import_ts.is_some());
    }

    #[tokio::test]
    async fn lists_output_collections() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;
        assert!(store.output_collections().await.unwrap().is_empty());

        store
            .insert_one(&record("dump.txt", None, 0, &[("is", 2), ("x", 1)]))
            .await
            .unwrap();
        store
            .run_pipeline(&word_count_pipeline("dump.txt", "words_aggr"))
            .await
            .unwrap();

        assert_eq!(
            store.output_collections().await.unwrap(),
            vec![("words_aggr".to_string(), 2)]
        );
    }

    struct EmitCounts;

    impl crate::store::Mapper for EmitCounts {
        fn map(&self, record: &ChunkRecord, emit: &mut dyn FnMut(&str, f64)) {
            for w in &record.words {
                emit(&w.word, w.cnt as f64);
            }
        }
    }

    struct Sum;

    impl crate::store::Reducer for Sum {
        fn reduce(&self, _key: &str, values: &[f64]) -> f64 {
            values.iter().sum()
        }
    }

    #[tokio::test]
    async fn map_reduce_reads_every_page() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp, "words").await;
        let records = PAGE_SIZE * 2 + 7;
        for i in 0..records {
            store
                .insert_one(&record("dump.txt", None, i, &[("is", 1), ("awesome", 2)]))
                .await
                .unwrap();
        }
        store
            .insert_one(&record("other.txt", None, 0, &[("is", 100)]))
            .await
            .unwrap();

        let request = MapReduceRequest {
            mapper: Box::new(EmitCounts),
            reducer: Box::new(Sum),
            filter: ChunkFilter::by_source("dump.txt"),
            destination: "words_mr".into(),
        };
        store.run_map_reduce(&request).await.unwrap();

        let rows = store.read_collection("words_mr").await.unwrap();
        assert_eq!(
            rows,
            vec![
                AggregatedRow {
                    word: "awesome".into(),
                    total: Total::Float((records * 2) as f64)
                },
                AggregatedRow {
                    word: "is".into(),
                    total: Total::Float(records as f64)
                },
            ]
        );

        // The read transaction is released: writes still go through.
        store
            .insert_one(&record("dump.txt", None, records, &[("is", 1)]))
            .await
            .unwrap();
    }

    #[test]
    fn merge_filters_detects_contradictions() {
        let a = ChunkFilter::by_source("a");
        let b = ChunkFilter::by_source("b");
        let any_host = ChunkFilter::by_stream("a", Some("h1"));
        assert_eq!(merge_filters(&[]), Some(ChunkFilter::all()));
        assert_eq!(merge_filters(&[&a, &any_host]), Some(any_host.clone()));
        assert_eq!(merge_filters(&[&a, &b]), None);
    }
}
