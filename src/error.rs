//! Error type for the import and aggregation core.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the importer, the aggregation strategies and the
/// store backends. Every variant carries enough context to retry by hand.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("store write failed while {context}: {source}")]
    StoreWrite {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "failed reading '{source_name}' (instance {}) at line {line}, chunk {chunk_index}: {source}",
        .instance_id.as_deref().unwrap_or("-")
    )]
    StreamRead {
        source_name: String,
        instance_id: Option<String>,
        chunk_index: i64,
        line: u64,
        #[source]
        source: io::Error,
    },

    #[error("unsupported pipeline: {0}")]
    UnsupportedPipeline(String),

    #[error("record encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn write(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Error {
        let context = context.into();
        move |source| Error::StoreWrite { context, source }
    }
}
