//! Retry command implementation.

use anyhow::{Context as _, Result};
use colored::Colorize;
use tracing::info;

use crate::utils::Context;

/// Execute the retry command.
///
/// Only resets entries; uploads happen under `mediaq run`.
pub async fn execute(ctx: &Context, max_retries: u32) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let reset = queue
        .try_retry_failed_uploads(max_retries, None)
        .await
        .context("Failed to retry failed uploads")?;

    info!(reset, max_retries, "Retry pass finished");
    if !ctx.quiet {
        println!("{} {} entr{} reset to queued", "Retry:".green().bold(), reset, if reset == 1 { "y" } else { "ies" });
    }
    Ok(())
}
