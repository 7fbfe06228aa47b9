//! Core data models used throughout wordchunk.
//!
//! These types represent the chunk records written by the importer, the
//! filters used to select them, and the aggregated rows produced by the
//! aggregation strategies.

use serde::{Deserialize, Serialize};

/// A single `(word, count)` pair inside a [`ChunkRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCount {
    pub word: String,
    pub cnt: i64,
}

impl WordCount {
    pub fn new(word: impl Into<String>, cnt: i64) -> Self {
        Self {
            word: word.into(),
            cnt,
        }
    }
}

/// One persisted unit of imported data.
///
/// Serializes to the logical record layout
/// `{source, instanceId?, chunkIndex, chunkCapacity, words: [{word, cnt}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub chunk_index: i64,
    pub chunk_capacity: i64,
    pub words: Vec<WordCount>,
}

impl ChunkRecord {
    /// Count recorded for `word` in this chunk, if present.
    pub fn count_of(&self, word: &str) -> Option<i64> {
        self.words.iter().find(|w| w.word == word).map(|w| w.cnt)
    }

    /// Sum of all counts in this chunk.
    pub fn total_words(&self) -> i64 {
        self.words.iter().map(|w| w.cnt).sum()
    }
}

/// Exact-match selection over chunk records.
///
/// `instance_id` is only part of the predicate when it is `Some`; a filter
/// without an instance id matches records of every instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub source: Option<String>,
    pub instance_id: Option<String>,
}

impl ChunkFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            instance_id: None,
        }
    }

    /// Filter on `source`, adding the instance predicate only when one is given.
    pub fn by_stream(source: impl Into<String>, instance_id: Option<&str>) -> Self {
        Self {
            source: Some(source.into()),
            instance_id: instance_id.map(str::to_string),
        }
    }

    pub fn matches(&self, record: &ChunkRecord) -> bool {
        if let Some(ref source) = self.source {
            if &record.source != source {
                return false;
            }
        }
        if let Some(ref id) = self.instance_id {
            if record.instance_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Total occurrence count of a word in an aggregated collection.
///
/// The pipeline engine sums integers; the map-reduce engine sums floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Total {
    Int(i64),
    Float(f64),
}

impl Total {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Total::Int(n) => n as f64,
            Total::Float(f) => f,
        }
    }

    /// Whether two totals denote the same number, ignoring representation.
    pub fn same_value(&self, other: &Total) -> bool {
        (self.as_f64() - other.as_f64()).abs() < f64::EPSILON
    }
}

impl std::fmt::Display for Total {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Total::Int(n) => write!(f, "{}", n),
            Total::Float(v) => write!(f, "{:.1}", v),
        }
    }
}

/// One row of an aggregated result collection: `word → total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub word: String,
    pub total: Total,
}

/// Sort rows by descending total, then ascending word.
pub fn sort_by_total(rows: &mut [AggregatedRow]) {
    rows.sort_by(|a, b| {
        b.total
            .as_f64()
            .partial_cmp(&a.total.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.word.cmp(&b.word))
    });
}

/// Per-stream summary of the chunk collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub instance_id: Option<String>,
    pub chunk_count: i64,
    pub word_total: i64,
    pub last_import_ts: Option<i64>,
}
