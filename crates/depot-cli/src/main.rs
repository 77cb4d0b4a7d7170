//! # depot CLI entry point
//!
//! Parses command-line arguments, loads configuration and dispatches to the
//! subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depot_cli::ls::{run_ls, LsArgs};
use depot_cli::rm::{run_rm, RmArgs};
use depot_cli::show::{run_show, ShowArgs};
use depot_cli::stale::{run_stale, StaleArgs};

/// Inspect and maintain a depot store directory.
#[derive(Parser, Debug)]
#[command(name = "depot", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory, overriding configuration.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stored records.
    Ls(LsArgs),

    /// Print one record's metadata.
    Show(ShowArgs),

    /// Delete one record.
    Rm(RmArgs),

    /// List or delete records past their maximum age.
    Stale(StaleArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v.
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match depot_cli::load_config(cli.config.as_deref(), cli.dir.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(2);
        }
    };
    tracing::debug!(dir = %cfg.dir.display(), "using depot store");

    let result = match &cli.command {
        Commands::Ls(args) => run_ls(args, &cfg),
        Commands::Show(args) => run_show(args, &cfg),
        Commands::Rm(args) => run_rm(args, &cfg),
        Commands::Stale(args) => run_stale(args, &cfg),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ls_with_global_flags() {
        let cli = Cli::try_parse_from(["depot", "-vv", "--dir", "/tmp/d", "ls", "--tag", "nlp", "-l"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/d")));
        match cli.command {
            Commands::Ls(args) => {
                assert_eq!(args.tag.as_deref(), Some("nlp"));
                assert!(args.long);
            }
            other => panic!("expected ls, got {other:?}"),
        }
    }

    #[test]
    fn parse_rm_dry_run() {
        let cli = Cli::try_parse_from(["depot", "rm", "a/File/local/x", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Rm(args) => {
                assert_eq!(args.id, "a/File/local/x");
                assert!(args.dry_run);
            }
            other => panic!("expected rm, got {other:?}"),
        }
    }

    #[test]
    fn parse_stale_options() {
        let cli = Cli::try_parse_from(["depot", "stale", "--max-age-days", "7", "--delete"]).unwrap();
        match cli.command {
            Commands::Stale(args) => {
                assert_eq!(args.max_age_days, Some(7));
                assert!(args.delete);
            }
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn show_requires_an_id() {
        assert!(Cli::try_parse_from(["depot", "show"]).is_err());
    }
}
