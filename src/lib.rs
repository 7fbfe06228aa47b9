//! # wordchunk
//!
//! Chunked word-count import with two interchangeable aggregation strategies.
//!
//! A text source is read line by line and tokenized into lowercase ASCII
//! words. Every `chunk` lines the per-word counts are flushed as one chunk
//! record tagged with the source name, an optional instance id and a
//! zero-based chunk index. Totals per word are then computed either by a
//! declarative pipeline (integer totals) or by map-reduce (float totals);
//! both strategies produce the same numbers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  source  │──▶│   Importer   │──▶│ chunk_records │
//! │  lines   │   │ tokenize+acc │   │   (Store)     │
//! └──────────┘   └──────────────┘   └───────┬───────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                ┌───────────┐       ┌─────────────┐
//!                │ pipeline  │       │ map-reduce  │
//!                │ words_aggr│       │  words_mr   │
//!                └───────────┘       └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wordchunk init
//! wordchunk run --source dump.txt --chunk 2 --aggregate --map-reduce
//! wordchunk show words_aggr --top 10
//! wordchunk stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`tokenize`] | Line → lowercase ASCII words |
//! | [`accumulator`] | Per-chunk word counts |
//! | [`import`] | Clean and chunked import of one source stream |
//! | [`aggregate`] | Pipeline and map-reduce strategies |
//! | [`store`] | Store trait, in-memory and SQLite engines |
//! | [`models`] | Chunk records, filters and aggregated rows |
//! | [`error`] | Library error type |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`progress`] | Import progress reporting |
//! | [`stats`] | `wordchunk stats` |
//! | [`show`] | `wordchunk show` |

pub mod accumulator;
pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod show;
pub mod stats;
pub mod store;
pub mod tokenize;
