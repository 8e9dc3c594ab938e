//! Status command implementation.

use anyhow::Result;
use colored::Colorize;

use crate::utils::{format_timestamp, Context};

/// Execute the status command.
pub async fn execute(ctx: &Context) -> Result<()> {
    let store = ctx.manifest_store();
    let exists = tokio::fs::try_exists(store.path()).await.unwrap_or(false);
    let stats = store.read().await.stats();

    if ctx.quiet {
        return Ok(());
    }

    println!("{} {}", "Queue:".bold(), store.layout().dir().display());
    println!("   {} {}", "Queued:   ".dimmed(), stats.queued_count);
    println!("   {} {}", "Uploading:".dimmed(), stats.uploading_count);
    println!("   {} {}", "Completed:".dimmed(), stats.completed_count);
    if stats.failed_count > 0 {
        println!("   {} {}", "Failed:   ".dimmed(), stats.failed_count.to_string().red());
    } else {
        println!("   {} {}", "Failed:   ".dimmed(), stats.failed_count);
    }
    println!("   {} {}", "Total:    ".dimmed(), stats.total_count);
    if exists {
        println!(
            "   {} {}",
            "Updated:  ".dimmed(),
            format_timestamp(stats.last_updated)
        );
    } else {
        println!("   {}", "No manifest yet".dimmed());
    }

    Ok(())
}
