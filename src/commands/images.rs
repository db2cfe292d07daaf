//! `images` command: list previously generated images

use std::sync::Arc;

use colored::Colorize;
use prettytable::{cell, row, Table};
use tokio_util::sync::CancellationToken;

use super::print_json;
use crate::api::client::AgentClient;
use crate::api::types::ImageHistoryEntry;
use crate::cache::ImageHistory;
use crate::config::Config;
use crate::error::{unshare, Result};

/// List image history once, or keep re-listing with `watch` until Ctrl-C
pub async fn list_images(config: &Config, json: bool, watch: bool) -> Result<()> {
    let client = AgentClient::new(&config.api)?;
    let history = Arc::new(ImageHistory::new(
        Arc::new(client),
        config.cache.images_refresh_interval(),
    ));

    if !watch {
        let images = history.list().await.map_err(unshare)?;
        return print_images(&images, json);
    }

    let mut updates = history.subscribe();
    let cancel = CancellationToken::new();
    let refresher = history.spawn_refresh(cancel.clone());
    tracing::info!(
        interval_secs = config.cache.images_refresh_interval().as_secs(),
        "Watching image history"
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = updates.borrow_and_update().clone();
                if let Some(images) = latest {
                    print_images(&images, json)?;
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    cancel.cancel();
    refresher.await?;
    Ok(())
}

fn print_images(images: &[ImageHistoryEntry], json: bool) -> Result<()> {
    if json {
        return print_json(images);
    }
    if images.is_empty() {
        println!("No images generated yet");
        return Ok(());
    }
    println!("\n{} ({}):\n", "Generated images".bold(), images.len());
    images_table(images).printstd();
    println!();
    Ok(())
}

/// Newest first; entries without a parsable timestamp sort last
fn sorted_newest_first(images: &[ImageHistoryEntry]) -> Vec<&ImageHistoryEntry> {
    let mut sorted: Vec<_> = images.iter().collect();
    sorted.sort_by(|a, b| b.last_modified_at().cmp(&a.last_modified_at()));
    sorted
}

fn images_table(images: &[ImageHistoryEntry]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Key", "Size", "Last Modified", "URL"]);
    for image in sorted_newest_first(images) {
        let modified = image
            .last_modified_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(row![image.key, format_size(image.size), modified, image.url]);
    }
    table
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{} B", bytes)
    } else if b < KIB * KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / (KIB * KIB))
    }
}
