use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How deployment results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "indexup")]
#[command(
    author,
    version,
    about = "Deploy and wire the Index contract suite"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "INDEXUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or to a directory containing `Indexup.toml`.
    ///
    /// If not provided, `./Indexup.toml` is used when it exists and the
    /// built-in defaults otherwise.
    #[arg(short, long, alias = "conf", global = true, env = "INDEXUP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy all contracts, register the roles and hand the index to the admin.
    Deploy {
        /// Run against an in-memory chain with placeholder bytecode.
        ///
        /// Nothing is sent to the node and no record is written.
        #[arg(long, env = "INDEXUP_DRY_RUN", default_value_t = false)]
        dry_run: bool,

        /// Output format of the result.
        #[arg(long, env = "INDEXUP_FORMAT", default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Print the solc `settings` JSON for building the contracts.
    SolcSettings,

    /// Print the effective configuration as TOML.
    ShowConfig,
}
