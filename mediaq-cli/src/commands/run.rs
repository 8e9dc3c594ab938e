//! Run command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use colored::Colorize;
use mediaq_core::{MediaQueueManager, MockUploader, Uploader, UploaderConfig, UploaderFactory};
use tracing::{info, warn};

use crate::utils::Context;

/// Poll interval while waiting for in-flight uploads to settle.
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// Execute the run command.
pub async fn execute(ctx: &Context, use_mock: bool, once: bool) -> Result<()> {
    let uploader = build_uploader(use_mock)?;
    if use_mock && !ctx.quiet {
        eprintln!("{}", "Using MOCK uploader (nothing leaves this machine)".yellow());
    }

    let queue = ctx.open_uploading_queue(uploader).await?;
    let before = queue.queue_stats().await;
    info!(
        queued = before.queued_count,
        failed = before.failed_count,
        "Processing media queue"
    );

    queue.process_queue();

    if once {
        wait_for_uploads(&queue).await;
    } else {
        let scheduler = queue.spawn_retry_scheduler();
        if !ctx.quiet {
            println!(
                "{} {} (Ctrl-C to stop)",
                "Uploading from".green().bold(),
                queue.queue_directory().display()
            );
        }
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Shutdown requested");
        scheduler.shutdown().await;
    }

    queue.sync().await.context("Failed to drain queue worker")?;
    let after = queue.queue_stats().await;

    if !ctx.quiet {
        println!();
        println!("{}", "Queue processed".green().bold());
        println!("   {} {}", "Still queued:".dimmed(), after.queued_count);
        println!("   {} {}", "Uploading:   ".dimmed(), after.uploading_count);
        if after.failed_count > 0 {
            println!(
                "   {} {}",
                "Failed:      ".dimmed(),
                after.failed_count.to_string().red()
            );
        } else {
            println!("   {} {}", "Failed:      ".dimmed(), after.failed_count);
        }
    }

    Ok(())
}

fn build_uploader(use_mock: bool) -> Result<Arc<dyn Uploader>> {
    if use_mock {
        warn!("Using MOCK uploader");
        return Ok(Arc::new(MockUploader::new()));
    }

    #[cfg(feature = "http")]
    {
        let config = mediaq_core::HttpUploaderConfig::from_env()
            .context("Upload endpoint not configured (or pass --mock)")?;
        UploaderFactory::create(UploaderConfig::Http(config)).context("Failed to create uploader")
    }

    #[cfg(not(feature = "http"))]
    {
        warn!("Built without HTTP support");
        UploaderFactory::create(UploaderConfig::Mock).context("Failed to create uploader")
    }
}

/// Wait until nothing is QUEUED or UPLOADING. Uploaders bound every attempt
/// with their own timeouts, so this always finishes.
async fn wait_for_uploads(queue: &MediaQueueManager) {
    loop {
        let stats = queue.queue_stats().await;
        if stats.queued_count == 0 && stats.uploading_count == 0 {
            break;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}
