//! Outbox CLI
//!
//! Command-line tools for inspecting and maintaining outbox stores.
//!
//! # Commands
//!
//! - `inspect` - Show queue, conflict, and log statistics
//! - `list` - List queued mutations in replay order
//! - `conflicts` - List conflicted mutations
//! - `resolve` - Acknowledge one or all conflicts
//! - `clear` - Drop every queued mutation
//! - `compact` - Rewrite the commit log as a snapshot
//! - `verify` - Check commit log integrity without modifying it

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Outbox CLI - tools for outbox mutation stores
#[derive(Parser)]
#[command(name = "outbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue, conflict, and log statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List queued mutations, oldest first
    List {
        /// Maximum number of mutations to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List conflicted mutations
    Conflicts {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Acknowledge conflicts
    Resolve {
        /// Id of the conflict to resolve
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        /// Resolve every conflict
        #[arg(long)]
        all: bool,
    },

    /// Drop every queued mutation
    Clear {
        /// Confirm the operation
        #[arg(long)]
        yes: bool,
    },

    /// Rewrite the commit log as a snapshot of the live state
    Compact,

    /// Check commit log integrity without modifying it
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("outbox {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("store path required (use --path)")?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, format)?,
        Commands::List { limit, format } => commands::list::run(&path, limit, format)?,
        Commands::Conflicts { format } => commands::conflicts::run(&path, format)?,
        Commands::Resolve { id, all } => commands::resolve::run(&path, id.as_deref(), all)?,
        Commands::Clear { yes } => commands::clear::run(&path, yes)?,
        Commands::Compact => commands::compact::run(&path)?,
        Commands::Verify => commands::verify::run(&path)?,
        Commands::Version => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resolve_needs_id_or_all() {
        assert!(Cli::try_parse_from(["outbox", "-p", "s", "resolve"]).is_err());
        assert!(Cli::try_parse_from(["outbox", "-p", "s", "resolve", "m1", "--all"]).is_err());

        let cli = Cli::try_parse_from(["outbox", "resolve", "--all", "--path", "s"]).unwrap();
        assert!(matches!(cli.command, Commands::Resolve { id: None, all: true }));
        assert_eq!(cli.path, Some(PathBuf::from("s")));
    }

    #[test]
    fn list_parses_limit_and_format() {
        let cli = Cli::try_parse_from(["outbox", "list", "-l", "5", "-f", "json"]).unwrap();
        match cli.command {
            Commands::List { limit, format } => {
                assert_eq!(limit, Some(5));
                assert_eq!(format, Format::Json);
            }
            _ => panic!("expected list"),
        }
    }
}
