//! Chunked import of a line-oriented text source.
//!
//! The [`Importer`] reads lines sequentially, tokenizes them, and keeps the
//! running word counts in a [`ChunkAccumulator`]. Every `chunk_capacity`
//! consumed lines the counts are written to the [`Store`] as one
//! [`ChunkRecord`](crate::models::ChunkRecord); whatever remains at the end
//! of the stream becomes a final, possibly partial, record.
//!
//! Lines end at `\n`, `\r\n` or a lone `\r`. Bytes that are not valid
//! UTF-8 decode to U+FFFD, which the tokenizer treats as a separator, so a
//! stray byte never aborts an import.
//!
//! Re-importing a stream is made idempotent by calling
//! [`Importer::clean_data`] first.

use std::io;
use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::accumulator::ChunkAccumulator;
use crate::error::{Error, Result};
use crate::models::ChunkFilter;
use crate::progress::{ImportProgressEvent, ImportProgressReporter};
use crate::store::Store;
use crate::tokenize::for_each_word;

/// Counters describing one finished import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub lines_skipped: u64,
    pub lines_consumed: u64,
    pub chunks_written: u64,
    pub words_counted: u64,
}

/// Writes the word counts of one `(source, instance_id)` stream.
///
/// Only one importer may write a given stream at a time; distinct streams
/// can be imported concurrently into the same store.
pub struct Importer<'s> {
    source: String,
    instance_id: Option<String>,
    store: &'s dyn Store,
    progress: Option<&'s dyn ImportProgressReporter>,
}

impl<'s> Importer<'s> {
    pub fn new(
        source: impl Into<String>,
        instance_id: Option<String>,
        store: &'s dyn Store,
    ) -> Self {
        Self {
            source: source.into(),
            instance_id,
            store,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: &'s dyn ImportProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Delete previously imported records of this stream.
    ///
    /// The instance id is part of the filter only when one was supplied;
    /// without it every record of the source is removed.
    pub async fn clean_data(&self) -> Result<u64> {
        let filter = ChunkFilter::by_stream(self.source.as_str(), self.instance_id());
        let deleted = self.store.delete_many(&filter).await?;
        debug!(
            source = %self.source,
            instance_id = ?self.instance_id,
            deleted,
            "cleaned previous chunks"
        );
        Ok(deleted)
    }

    /// Import `lines` in chunks of `chunk_capacity` lines.
    ///
    /// The first `skip_lines` lines are discarded, then at most `limit_lines`
    /// lines are consumed (`0` = no limit). A `chunk_capacity` of `0` keeps
    /// everything in a single final chunk. Chunks written before a read
    /// failure stay in the store; only I/O errors count as read failures.
    pub async fn import_in_chunks<R>(
        &self,
        lines: R,
        skip_lines: u64,
        limit_lines: u64,
        chunk_capacity: u64,
    ) -> Result<ImportSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let capacity = i64::try_from(chunk_capacity).map_err(|_| {
            Error::InvalidArgument(format!("chunk size {} is too large", chunk_capacity))
        })?;

        let mut lines = SourceLines::new(lines);
        let mut summary = ImportSummary::default();
        let mut accumulator = ChunkAccumulator::new();
        let mut chunk_index: i64 = 0;
        let mut lines_in_chunk: u64 = 0;

        while summary.lines_skipped < skip_lines {
            let line = lines
                .next_line()
                .await
                .map_err(|e| self.read_error(e, chunk_index, summary.lines_skipped + 1))?;
            if line.is_none() {
                break;
            }
            summary.lines_skipped += 1;
        }
        if summary.lines_skipped > 0 {
            self.report(ImportProgressEvent::Skipping {
                source: self.source.clone(),
                skipped: summary.lines_skipped,
            });
        }

        loop {
            if limit_lines > 0 && summary.lines_consumed == limit_lines {
                break;
            }
            let line_no = summary.lines_skipped + summary.lines_consumed + 1;
            let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| self.read_error(e, chunk_index, line_no))?
            else {
                break;
            };

            for_each_word(&line, |word| {
                accumulator.observe(word);
                summary.words_counted += 1;
            });
            summary.lines_consumed += 1;
            lines_in_chunk += 1;

            if chunk_capacity > 0 && summary.lines_consumed % chunk_capacity == 0 {
                self.flush(&mut accumulator, chunk_index, capacity, lines_in_chunk)
                    .await?;
                summary.chunks_written += 1;
                chunk_index += 1;
                lines_in_chunk = 0;
            }
        }

        if !accumulator.is_empty() {
            self.flush(&mut accumulator, chunk_index, capacity, lines_in_chunk)
                .await?;
            summary.chunks_written += 1;
        }

        if summary.lines_consumed == 0 {
            warn!(source = %self.source, skipped = summary.lines_skipped, "no lines imported");
        }
        info!(
            source = %self.source,
            instance_id = ?self.instance_id,
            lines = summary.lines_consumed,
            chunks = summary.chunks_written,
            words = summary.words_counted,
            "import finished"
        );
        Ok(summary)
    }

    async fn flush(
        &self,
        accumulator: &mut ChunkAccumulator,
        chunk_index: i64,
        chunk_capacity: i64,
        lines: u64,
    ) -> Result<()> {
        let distinct_words = accumulator.len();
        debug!(chunk_index, distinct_words, lines, "saving chunk");
        let record = accumulator.drain_as_record(
            &self.source,
            self.instance_id(),
            chunk_index,
            chunk_capacity,
        );
        self.store.insert_one(&record).await?;
        self.report(ImportProgressEvent::ChunkWritten {
            source: self.source.clone(),
            chunk_index,
            lines,
            distinct_words,
        });
        Ok(())
    }

    fn report(&self, event: ImportProgressEvent) {
        if let Some(progress) = self.progress {
            progress.report(event);
        }
    }

    fn read_error(&self, source: io::Error, chunk_index: i64, line: u64) -> Error {
        Error::StreamRead {
            source_name: self.source.clone(),
            instance_id: self.instance_id.clone(),
            chunk_index,
            line,
            source,
        }
    }
}

/// Open a source file for import, rejecting anything that is not a
/// readable regular file.
pub async fn open_source(path: &Path) -> Result<BufReader<tokio::fs::File>> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::InvalidArgument(format!("source {} does not exist: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(Error::InvalidArgument(format!(
            "source {} is not a file",
            path.display()
        )));
    }
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        Error::InvalidArgument(format!("source {} is not readable: {}", path.display(), e))
    })?;
    Ok(BufReader::new(file))
}

/// Line splitter over raw bytes.
///
/// A line ends at `\n`, at `\r\n`, or at a `\r` not followed by `\n`;
/// the terminator is not part of the line. A final line without a
/// terminator is still returned. Content is decoded lossily.
struct SourceLines<R> {
    reader: R,
    buf: Vec<u8>,
    // The previous line ended with `\r`; a `\n` right after it belongs to it.
    skip_lf: bool,
}

impl<R: AsyncBufRead + Unpin> SourceLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            skip_lf: false,
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let mut read_any = false;
        loop {
            let (used, done) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                let mut start = 0;
                if self.skip_lf {
                    self.skip_lf = false;
                    if available[0] == b'\n' {
                        start = 1;
                    }
                }
                let rest = &available[start..];
                match rest.iter().position(|&b| b == b'\n' || b == b'\r') {
                    Some(i) => {
                        self.buf.extend_from_slice(&rest[..i]);
                        self.skip_lf = rest[i] == b'\r';
                        (start + i + 1, true)
                    }
                    None => {
                        self.buf.extend_from_slice(rest);
                        read_any |= !rest.is_empty();
                        (available.len(), false)
                    }
                }
            };
            self.reader.consume(used);
            if done {
                return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
            }
        }
        if read_any {
            Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
        } else {
            Ok(None)
        }
    }
}
