//! Enqueue command implementation.

use std::path::PathBuf;

use anyhow::{anyhow, Context as _, Result};
use colored::Colorize;
use mediaq_core::MediaType;
use tracing::{debug, info};

use crate::utils::Context;

/// Execute the enqueue command.
pub async fn execute(
    ctx: &Context,
    file: PathBuf,
    request_id: String,
    app_id: String,
    media_type: Option<String>,
) -> Result<()> {
    let media_type = match media_type {
        Some(raw) => raw
            .parse::<MediaType>()
            .map_err(|_| anyhow!("Invalid media type: {raw} (expected photo or video)"))?,
        None => MediaType::detect(&file),
    };
    debug!(media_type = %media_type, "Resolved media type");

    let queue = ctx.open_queue().await?;
    let entry = queue
        .try_enqueue(&file, &request_id, &app_id, media_type)
        .await
        .with_context(|| format!("Failed to queue {}", file.display()))?;

    info!(request_id = %entry.request_id, path = %entry.queued_path.display(), "Media staged");

    if !ctx.quiet {
        println!("{} {}", "Queued:".green().bold(), entry.request_id);
        println!("   {} {}", "Type:".dimmed(), entry.media_type);
        println!("   {} {}", "App:".dimmed(), entry.app_id);
        println!("   {} {}", "Path:".dimmed(), entry.queued_path.display());
    }

    Ok(())
}
