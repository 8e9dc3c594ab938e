//! Clear command implementation.

use anyhow::Result;
use colored::Colorize;
use tracing::warn;

use crate::utils::Context;

/// Execute the clear command.
pub async fn execute(ctx: &Context) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let removed = queue.clear_queue().await;

    warn!(removed, "Queue cleared from the command line");
    if !ctx.quiet {
        println!("{} {} entr{} removed", "Cleared:".yellow().bold(), removed, if removed == 1 { "y" } else { "ies" });
    }
    Ok(())
}
