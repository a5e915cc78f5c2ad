//! Command-line interface for the bakery.
//!
//! Every option except `--config` overrides a value from the configuration
//! file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of synthetic entities
    pub entities: Option<usize>,
    /// Optional override for the worker pool size
    pub workers: Option<usize>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to log every document URL once the bake finishes
    pub list_documents: bool,
}

fn command() -> Command {
    Command::new("Layer Bakery")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bakes a synthetic auto-managed layer into a division tree")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("bakery.toml"),
        )
        .arg(
            Arg::new("entities")
                .short('n')
                .long("entities")
                .value_name("COUNT")
                .help("Number of synthetic entities to bake")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("COUNT")
                .help("Number of concurrent queue workers")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-documents")
                .long("list-documents")
                .help("Log every document URL after the bake")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments; exits with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bakery.toml")),
            entities: matches.get_one::<usize>("entities").copied(),
            workers: matches.get_one::<usize>("workers").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            list_documents: matches.get_flag("list-documents"),
        }
    }
}
