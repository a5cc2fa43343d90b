//! surelog CLI
//!
//! Command-line tools for surelog directories. All commands are read-only.
//!
//! # Commands
//!
//! - `inspect` - List segments with their ids and uncommitted events
//! - `verify` - Check every segment for damage
//! - `dump` - Print the records of one segment

mod commands;

use clap::{Parser, Subcommand};
use commands::{OutputFormat, PayloadCodec};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// surelog command-line tools.
#[derive(Parser)]
#[command(name = "surelog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// How event payloads are encoded
    #[arg(global = true, long, value_enum, default_value_t = PayloadCodec::Cbor)]
    codec: PayloadCodec,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List segments with their ids and uncommitted events
    Inspect {
        /// List the uncommitted event ids of each segment
        #[arg(short, long)]
        uncommitted: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check every segment for damage
    Verify {
        /// Fail unless every segment carries this event type descriptor
        #[arg(short, long)]
        descriptor: Option<String>,
    },

    /// Print the records of one segment
    Dump {
        /// Segment name, e.g. part.0 or part.current
        segment: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Include decoded payloads of uncommitted events
        #[arg(long)]
        payloads: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect {
            uncommitted,
            format,
        } => {
            let path = cli.path.ok_or("Log directory path required for inspect")?;
            commands::inspect::run(&path, cli.codec, uncommitted, format)?;
        }
        Commands::Verify { descriptor } => {
            let path = cli.path.ok_or("Log directory path required for verify")?;
            commands::verify::run(&path, cli.codec, descriptor.as_deref())?;
        }
        Commands::Dump {
            segment,
            limit,
            payloads,
            format,
        } => {
            let path = cli.path.ok_or("Log directory path required for dump")?;
            commands::dump::run(&path, &segment, cli.codec, limit, payloads, format)?;
        }
        Commands::Version => {
            println!("surelog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("surelog core v{}", surelog_core::VERSION);
        }
    }

    Ok(())
}
