//! Store statistics.
//!
//! Summarizes what has been imported: chunk counts and word totals per
//! source and instance, plus the aggregated collections present in the
//! database. Used by `wordchunk stats` to confirm that an import or an
//! aggregation actually landed.

use anyhow::Result;

use crate::config::Config;
use crate::models::SourceStats;
use crate::progress::format_number;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let streams = store.stats().await?;
    let outputs = store.output_collections().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let chunk_total: i64 = streams.iter().map(|s| s.chunk_count).sum();
    let word_total: i64 = streams.iter().map(|s| s.word_total).sum();

    println!("wordchunk: store stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", store.collection());
    println!();
    println!("  Chunks:      {}", format_number(chunk_total.max(0) as u64));
    println!("  Words:       {}", format_number(word_total.max(0) as u64));

    if !streams.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<28} {:<12} {:>8} {:>12}   {}",
            "SOURCE", "INSTANCE", "CHUNKS", "WORDS", "LAST IMPORT"
        );
        println!("  {}", "-".repeat(80));
        for s in &streams {
            println!("  {}", stream_line(s));
        }
    }

    if !outputs.is_empty() {
        println!();
        println!("  Aggregated collections:");
        for (name, words) in &outputs {
            println!("  {:<28} {:>8} words", name, format_number(*words as u64));
        }
    }

    println!();

    store.close().await;
    Ok(())
}

fn stream_line(s: &SourceStats) -> String {
    let imported = match s.last_import_ts {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    };
    format!(
        "{:<28} {:<12} {:>8} {:>12}   {}",
        s.source,
        s.instance_id.as_deref().unwrap_or("-"),
        s.chunk_count,
        format_number(s.word_total.max(0) as u64),
        imported
    )
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
