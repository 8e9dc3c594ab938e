//! Compact command implementation.

use anyhow::{Context as _, Result};
use colored::Colorize;

use crate::utils::Context;

/// Execute the compact command.
pub async fn execute(ctx: &Context) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let removed = queue.compact().await.context("Failed to compact queue")?;

    if !ctx.quiet {
        println!("{} {} completed entr{} removed", "Compacted:".green().bold(), removed, if removed == 1 { "y" } else { "ies" });
    }
    Ok(())
}
