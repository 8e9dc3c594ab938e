//! Rebuild command implementation.

use anyhow::{Context as _, Result};
use colored::Colorize;

use crate::utils::Context;

/// Execute the rebuild command.
pub async fn execute(ctx: &Context) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let recovered = queue
        .try_rebuild_manifest()
        .await
        .context("Failed to rebuild manifest")?;

    if !ctx.quiet {
        println!(
            "{} {} file(s) recovered into {}",
            "Rebuilt:".green().bold(),
            recovered,
            queue.queue_directory().display()
        );
        if recovered > 0 {
            println!(
                "   {}",
                "Recovered entries are QUEUED with app id 'system'".dimmed()
            );
        }
    }
    Ok(())
}
