//! Import progress reporting.
//!
//! Reports each chunk flush during `wordchunk run` so users can follow a long
//! import. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for an import.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportProgressEvent {
    /// Skipping leading lines before the import starts.
    Skipping { source: String, skipped: u64 },
    /// A chunk record was written.
    ChunkWritten {
        source: String,
        chunk_index: i64,
        lines: u64,
        distinct_words: usize,
    },
}

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the import loop.
    fn report(&self, event: ImportProgressEvent);
}

/// Human-friendly progress on stderr: "import dump.txt  chunk 3  400,000 lines".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Skipping { source, skipped } => {
                format!(
                    "import {}  skipped {} lines\n",
                    source,
                    format_number(*skipped)
                )
            }
            ImportProgressEvent::ChunkWritten {
                source,
                chunk_index,
                lines,
                distinct_words,
            } => format!(
                "import {}  chunk {}  {} lines  {} distinct words\n",
                source,
                chunk_index,
                format_number(*lines),
                format_number(*distinct_words as u64)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        let obj = match &event {
            ImportProgressEvent::Skipping { source, skipped } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "skipping",
                "skipped": skipped
            }),
            ImportProgressEvent::ChunkWritten {
                source,
                chunk_index,
                lines,
                distinct_words,
            } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "chunk",
                "chunk_index": chunk_index,
                "lines": lines,
                "distinct_words": distinct_words
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to the importer.
    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
