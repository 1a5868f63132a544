//! Lodestore CLI
//!
//! Command-line tools for inspecting and syncing a file-backed lodestore
//! cache.
//!
//! # Commands
//!
//! - `pending` - List entities waiting to be pushed
//! - `query-cache` - List recorded pull timestamps
//! - `push` / `pull` / `sync` - Drive a collection against a backend
//! - `clear-sync` - Discard pending entities (dangerous)

mod commands;

use clap::{Parser, Subcommand};
use commands::Context;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lodestore command-line cache tools.
#[derive(Parser)]
#[command(name = "lodestore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Storage namespace
    #[arg(global = true, short, long, default_value = lodestore_sync_engine::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Cache tag
    #[arg(global = true, short, long)]
    tag: Option<String>,

    /// Backend base URL
    #[arg(global = true, short, long)]
    url: Option<String>,

    /// Session token sent as a bearer token
    #[arg(global = true, long)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entities waiting to be pushed
    Pending {
        /// Collection name
        collection: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List recorded pull timestamps
    QueryCache {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Push pending entities to the backend
    Push {
        /// Collection name
        collection: String,
    },

    /// Pull a collection from the backend
    Pull {
        /// Collection name
        collection: String,

        /// Use delta-set pulls when possible
        #[arg(long)]
        delta: bool,

        /// Fetch page by page
        #[arg(long)]
        paginate: bool,

        /// Page size for --paginate
        #[arg(long)]
        page_size: Option<usize>,

        /// Push pending entities first
        #[arg(long)]
        push_first: bool,
    },

    /// Push pending entities, then pull
    Sync {
        /// Collection name
        collection: String,
    },

    /// Discard pending entities without pushing them
    ClearSync {
        /// Collection name
        collection: String,

        /// Confirm that unsynced edits will be lost
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("Lodestore CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let context = Context {
        path: cli.path.ok_or("Cache path required (--path)")?,
        namespace: cli.namespace,
        tag: cli.tag,
        url: cli.url,
        token: cli.token,
    };

    match cli.command {
        Commands::Pending { collection, format } => {
            commands::pending::run(&context, &collection, &format).await?;
        }
        Commands::QueryCache { format } => {
            commands::query_cache::run(&context, &format).await?;
        }
        Commands::Push { collection } => {
            commands::sync::push(&context, &collection).await?;
        }
        Commands::Pull {
            collection,
            delta,
            paginate,
            page_size,
            push_first,
        } => {
            let options = commands::sync::PullOptions {
                delta,
                paginate,
                page_size,
                push_first,
            };
            commands::sync::pull(&context, &collection, options).await?;
        }
        Commands::Sync { collection } => {
            commands::sync::sync(&context, &collection).await?;
        }
        Commands::ClearSync { collection, yes } => {
            commands::clear_sync::run(&context, &collection, yes).await?;
        }
        Commands::Version => {}
    }

    Ok(())
}
