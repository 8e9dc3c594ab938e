//! Mediaq CLI - Inspect and drive a local media upload queue.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error (invalid arguments)
  66  Input file not found
  69  Upload service unavailable
  74  I/O error in the queue directory
  75  Queue busy (manifest lock timed out), try again";

#[derive(Parser)]
#[command(name = "mediaq")]
#[command(author, version, about = "Durable local media upload queue", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Directory containing the media_queue/ directory
    #[arg(long, global = true, env = "MEDIAQ_ROOT", value_name = "DIR")]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress user-facing output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a captured file into the queue (staging only, no upload)
    Enqueue {
        /// Path to the captured photo or video
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Correlation id for this capture (must be unique in the queue)
        #[arg(long)]
        request_id: String,

        /// App that requested the capture
        #[arg(long, default_value = mediaq_core::DEFAULT_APP_ID)]
        app_id: String,

        /// photo or video (detected from the extension when omitted)
        #[arg(long)]
        media_type: Option<String>,
    },

    /// Show entry counts per status
    Status,

    /// List every entry in the manifest
    List {
        /// Print the raw entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset failed uploads to queued
    Retry {
        /// Entries that failed more often than this stay failed
        #[arg(long, default_value_t = mediaq_core::config::DEFAULT_MAX_RETRIES)]
        max_retries: u32,
    },

    /// Rebuild the manifest from the files in the queue directory
    Rebuild,

    /// Delete every queued file and entry
    Clear,

    /// Drop completed entries from the manifest
    Compact,

    /// Upload queued media and keep retrying failures until Ctrl-C
    Run {
        /// Use the mock uploader instead of the HTTP endpoints
        #[arg(long)]
        mock: bool,

        /// Process the queue once, wait for uploads to settle, then exit
        #[arg(long)]
        once: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = utils::Context::new(cli.root, cli.quiet);

    match cli.command {
        Commands::Enqueue {
            file,
            request_id,
            app_id,
            media_type,
        } => commands::enqueue::execute(&ctx, file, request_id, app_id, media_type).await,
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::List { json } => commands::list::execute(&ctx, json).await,
        Commands::Retry { max_retries } => commands::retry::execute(&ctx, max_retries).await,
        Commands::Rebuild => commands::rebuild::execute(&ctx).await,
        Commands::Clear => commands::clear::execute(&ctx).await,
        Commands::Compact => commands::compact::execute(&ctx).await,
        Commands::Run { mock, once } => commands::run::execute(&ctx, mock, once).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit = match run(cli).await {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };

    if let Some(message) = &exit.message {
        eprintln!("Error: {message}");
    }
    std::process::exit(exit.code);
}
