//! `wordchunk show`: print an aggregated collection, highest totals first.

use anyhow::Result;

use crate::config::Config;
use crate::models::{sort_by_total, AggregatedRow};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

pub async fn run_show(config: &Config, collection: &str, top: usize) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let rows = store.read_collection(collection).await?;
    store.close().await;

    if rows.is_empty() {
        println!("Collection '{}' is empty.", collection);
        return Ok(());
    }

    let total = rows.len();
    let lines = ranked_lines(rows, top);
    let shown = lines.len();
    for line in lines {
        println!("{}", line);
    }
    if shown < total {
        println!("... {} more", total - shown);
    }
    Ok(())
}

/// `word<TAB>total` lines, sorted by total descending then word. `top == 0`
/// keeps every row.
fn ranked_lines(mut rows: Vec<AggregatedRow>, top: usize) -> Vec<String> {
    sort_by_total(&mut rows);
    if top > 0 {
        rows.truncate(top);
    }
    rows.iter()
        .map(|r| format!("{}\t{}", r.word, r.total))
        .collect()
}
