//! herald - outbox 配送パイプラインの CLI
//!
//! SQLite のデータベースファイルと JSON の actor ディレクトリを使って
//! パイプラインを組み立て、運用コマンドを提供する。

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use herald_core::domain::{ActorKind, OutboxItemId, Visibility};
use herald_core::observability::{LogFormat, init_tracing};

mod commands;

/// herald - crash-safe outbox and fan-out delivery for federated activities
#[derive(Parser)]
#[command(name = "herald")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "HERALD_DATABASE", default_value = "herald.db", global = true)]
    database: PathBuf,

    /// JSON config file; defaults apply when missing
    #[arg(long, env = "HERALD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// JSON actor directory (local actors, followers, remote inboxes)
    #[arg(long, env = "HERALD_DIRECTORY", default_value = "directory.json", global = true)]
    directory: PathBuf,

    /// Log output format: compact or json
    #[arg(long, default_value = "compact", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers, the stuck-item sweep and GC until Ctrl-C
    Run,

    /// Enqueue an activity read from a JSON file
    Enqueue {
        file: PathBuf,

        /// Local identity the activity is sent as: user, blog or application
        #[arg(long, default_value = "user")]
        actor: ActorKind,

        /// public, quiet-public, private or local-only
        #[arg(long, default_value = "public")]
        visibility: Visibility,
    },

    /// Enqueue the inverse of an outbox item
    Undo { id: OutboxItemId },

    /// Put an outbox item back to pending and deliver it again
    Reschedule { id: OutboxItemId },

    /// Print outbox counts as JSON
    Status,

    /// Schedule the purge of old published items
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = herald_core::config::PipelineConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_level, cli.log_format);

    let pipeline = commands::open(&cli.database, &cli.directory, config).await?;

    match cli.command {
        Commands::Run => commands::run(&pipeline).await?,
        Commands::Enqueue {
            file,
            actor,
            visibility,
        } => commands::enqueue(&pipeline, &file, actor, visibility).await?,
        Commands::Undo { id } => commands::undo(&pipeline, id).await?,
        Commands::Reschedule { id } => commands::reschedule(&pipeline, id).await?,
        Commands::Status => commands::status(&pipeline).await?,
        Commands::Purge => commands::purge(&pipeline).await?,
    }

    Ok(())
}
