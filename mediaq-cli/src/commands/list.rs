//! List command implementation.

use anyhow::{Context as _, Result};
use colored::Colorize;
use mediaq_core::MediaStatus;

use crate::utils::{format_timestamp, status_label, Context};

/// Execute the list command.
pub async fn execute(ctx: &Context, json: bool) -> Result<()> {
    let media = ctx.manifest_store().read().await.media_items;

    if json {
        let out = serde_json::to_string_pretty(&media).context("Failed to serialize entries")?;
        println!("{out}");
        return Ok(());
    }

    if ctx.quiet {
        return Ok(());
    }
    if media.is_empty() {
        println!("{}", "Queue is empty".dimmed());
        return Ok(());
    }

    for entry in &media {
        let label = status_label(entry.status);
        let status = match entry.status {
            MediaStatus::Queued => label.normal(),
            MediaStatus::Uploading => label.cyan(),
            MediaStatus::Completed => label.green(),
            MediaStatus::Failed => label.red(),
        };
        let queued_at = entry
            .queued_time
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{} {:<5} {} {} {}",
            status,
            entry.media_type,
            entry.request_id.bold(),
            entry.app_id.dimmed(),
            queued_at.dimmed()
        );
        if let Some(url) = &entry.media_url {
            println!("          {} {}", "url:".dimmed(), url);
        }
        if let Some(error) = &entry.last_error {
            println!(
                "          {} {} (retries: {})",
                "error:".dimmed(),
                error.red(),
                entry.retry_count
            );
        }
    }

    Ok(())
}
