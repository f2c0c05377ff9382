//! confit CLI - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod render;

#[derive(Parser)]
#[command(name = "confit")]
#[command(version)]
#[command(about = "Compose, merge and resolve configuration documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a document, apply overlays and overrides, print the result
    Load {
        /// Include string or file path (bare paths get the file loader)
        target: String,

        /// Overlay documents merged on top, each written as +path
        overlays: Vec<String>,

        /// Leaf override (key.path=value), pre-resolved leniently
        #[arg(short = 's', long = "set")]
        set: Vec<String>,

        /// Context binding for interpolation (NAME=VALUE)
        #[arg(short = 'c', long = "context")]
        context: Vec<String>,

        /// Force deferral at paths matching this pattern
        #[arg(long = "deferred")]
        deferred: Vec<String>,

        /// Extra directories searched by the file loader
        #[arg(long = "search-path")]
        search_path: Vec<String>,

        /// Output format (json or yaml)
        #[arg(short = 'f', long, default_value = "yaml")]
        format: String,
    },

    /// Merge documents with an explicit merge key and print the result
    Merge {
        /// Base document
        base: String,

        /// Documents merged on top, in order
        overlays: Vec<String>,

        /// The merge key applied between layers
        #[arg(short = 'k', long, default_value = "<<{<+}[<~]")]
        key: String,

        /// Output format (json or yaml)
        #[arg(short = 'f', long, default_value = "yaml")]
        format: String,
    },

    /// Compose a document and report composition errors without output
    Check {
        /// Include string or file path
        target: String,

        /// Extra directories searched by the file loader
        #[arg(long = "search-path")]
        search_path: Vec<String>,
    },
}

fn main() {
    // Set up logging to stderr, filtered by RUST_LOG
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(error) = run() {
        eprintln!("{error:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Load {
            target,
            overlays,
            set,
            context,
            deferred,
            search_path,
            format,
        } => commands::load::execute(commands::load::LoadArgs {
            target,
            overlays,
            set,
            context,
            deferred,
            search_path,
            format,
        }),
        Commands::Merge {
            base,
            overlays,
            key,
            format,
        } => commands::merge::execute(base, overlays, &key, &format),
        Commands::Check {
            target,
            search_path,
        } => commands::check::execute(&target, search_path),
    }
}
