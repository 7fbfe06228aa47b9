//! In-memory word counts for the chunk currently being imported.

use std::collections::HashMap;

use crate::models::{ChunkRecord, WordCount};

/// Running `word → count` map, reset whenever it is drained into a record.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    counts: HashMap<String, i64>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `word`.
    pub fn observe(&mut self, word: &str) {
        if let Some(count) = self.counts.get_mut(word) {
            *count += 1;
        } else {
            self.counts.insert(word.to_string(), 1);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of distinct words held.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Move the current counts into a [`ChunkRecord`] and start over empty.
    pub fn drain_as_record(
        &mut self,
        source: &str,
        instance_id: Option<&str>,
        chunk_index: i64,
        chunk_capacity: i64,
    ) -> ChunkRecord {
        let words = std::mem::take(&mut self.counts)
            .into_iter()
            .map(|(word, cnt)| WordCount { word, cnt })
            .collect();

        ChunkRecord {
            source: source.to_string(),
            instance_id: instance_id.map(str::to_string),
            chunk_index,
            chunk_capacity,
            words,
        }
    }
}
