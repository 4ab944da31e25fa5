//! Read-only cache and sync statistics (spec section 6, "stats
//! subcommand"). Opens the persistent store and content cache directly —
//! no remote client, no mount, no daemon instance required.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use onemount_core::config::Config;
use onemount_core::domain::item::{Item, ItemState};
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::persistent_store::{Bucket, PersistentStore};
use onemount_store::{DiskContentCache, SledStore};
use onemount_sync::delta::DeltaEngine;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub cache_dir: String,
    pub content_cache_bytes: u64,
    pub item_count: usize,
    pub items_by_state: BTreeMap<String, usize>,
    pub delta_cursor_present: bool,
    pub delta_cursor_age_secs: Option<i64>,
}

fn state_label(state: &ItemState) -> &'static str {
    match state {
        ItemState::Ghost => "ghost",
        ItemState::Hydrating => "hydrating",
        ItemState::Hydrated => "hydrated",
        ItemState::DirtyLocal => "dirty_local",
        ItemState::DeletedLocal => "deleted_local",
        ItemState::Conflict => "conflict",
        ItemState::Error => "error",
    }
}

pub async fn run(config: &Config) -> Result<StatsReport> {
    let db_path = config.mount.cache_dir.join("store.sled");
    let store = SledStore::open(&db_path)
        .await
        .with_context(|| format!("opening persistent store at {}", db_path.display()))?;
    let cache = DiskContentCache::new(config.mount.cache_dir.clone())
        .await
        .with_context(|| format!("opening content cache at {}", config.mount.cache_dir.display()))?;

    let content_cache_bytes = cache.total_bytes().await;

    let entries = store.range(Bucket::Metadata, b"").await.context("reading metadata bucket")?;
    let mut items_by_state: BTreeMap<String, usize> = BTreeMap::new();
    let mut item_count = 0usize;
    for (_, value) in &entries {
        let Ok(item) = serde_json::from_slice::<Item>(value) else { continue };
        item_count += 1;
        *items_by_state.entry(state_label(&item.state).to_string()).or_insert(0) += 1;
    }

    let (cursor, updated_at) = DeltaEngine::read_cursor_state(&store).await;
    let delta_cursor_age_secs = updated_at.map(|dt| (chrono::Utc::now() - dt).num_seconds());

    Ok(StatsReport {
        cache_dir: config.mount.cache_dir.display().to_string(),
        content_cache_bytes,
        item_count,
        items_by_state,
        delta_cursor_present: cursor.is_some(),
        delta_cursor_age_secs,
    })
}

pub fn print_human(report: &StatsReport) {
    println!("cache directory:     {}", report.cache_dir);
    println!("content cache size:  {} bytes", report.content_cache_bytes);
    println!("items tracked:       {}", report.item_count);
    for (state, count) in &report.items_by_state {
        println!("  {state:<14} {count}");
    }
    match report.delta_cursor_age_secs {
        Some(age) if report.delta_cursor_present => println!("delta cursor age:    {age}s"),
        _ => println!("delta cursor age:    no cursor yet"),
    }
}
