//! Command-line interface handling for the stream KNN service.
//!
//! This module provides command-line argument parsing using the `clap`
//! builder API. Every option except `--config` overrides a setting of the
//! configuration file.

use crate::config::AppConfig;
use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;
use stream_knn_runtime::BackpressureMode;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the input file
    pub input: Option<PathBuf>,
    /// Optional override for the result file
    pub output: Option<PathBuf>,
    pub k: Option<usize>,
    pub index_height: Option<u32>,
    pub boundary_scale: Option<f64>,
    pub query_quota: Option<i64>,
    pub workers: Option<usize>,
    pub backpressure: Option<BackpressureMode>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Compute results without writing them
    pub no_write: bool,
    /// Score results against a serial reference
    pub evaluate: bool,
}

/// Builds the clap command definition.
pub fn command() -> Command {
    Command::new("stream_knn")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Continuous K-nearest-neighbor search over a stream of timestamped points")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("stream_knn.toml"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Delimited point file (id, timestamp, coordinates[, query flag])"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Result file (stdout when omitted)"),
        )
        .arg(
            Arg::new("k")
                .short('k')
                .value_name("K")
                .help("Neighbors per query point")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("index-height")
                .long("index-height")
                .value_name("HEIGHT")
                .help("Partition index height (2^(height-1) cells per axis)")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("boundary-scale")
                .long("boundary-scale")
                .value_name("SCALE")
                .help("Boundary margin as a fraction of the cell width")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("query-quota")
                .long("query-quota")
                .value_name("N")
                .help("Query points per slide (-1 all, 0 none)")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64)),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("COUNT")
                .help("Number of partition workers")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("backpressure")
                .long("backpressure")
                .value_name("MODE")
                .help("What to do when a worker queue is full (block, reject)")
                .value_parser(|value: &str| value.parse::<BackpressureMode>()),
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
            Arg::new("no-write")
                .long("no-write")
                .help("Compute results but do not write them")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("evaluate")
                .long("evaluate")
                .help("Report precision and recall against a serial, unpartitioned run")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
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
                .unwrap_or_else(|| PathBuf::from("stream_knn.toml")),
            input: matches.get_one::<String>("input").map(PathBuf::from),
            output: matches.get_one::<String>("output").map(PathBuf::from),
            k: matches.get_one::<usize>("k").copied(),
            index_height: matches.get_one::<u32>("index-height").copied(),
            boundary_scale: matches.get_one::<f64>("boundary-scale").copied(),
            query_quota: matches.get_one::<i64>("query-quota").copied(),
            workers: matches.get_one::<usize>("workers").copied(),
            backpressure: matches.get_one::<BackpressureMode>("backpressure").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            no_write: matches.get_flag("no-write"),
            evaluate: matches.get_flag("evaluate"),
        }
    }

    /// Applies every override given on the command line to `config`.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(input) = &self.input {
            config.io.input_path = input.to_string_lossy().to_string();
        }
        if let Some(output) = &self.output {
            config.io.output_path = Some(output.to_string_lossy().to_string());
        }
        if let Some(k) = self.k {
            config.knn.k = k;
        }
        if let Some(height) = self.index_height {
            config.index.height = height;
        }
        if let Some(scale) = self.boundary_scale {
            config.index.boundary_length_scale = scale;
        }
        if let Some(quota) = self.query_quota {
            config.stream.query_quota = quota;
        }
        if let Some(workers) = self.workers {
            config.runtime.partition_workers = workers;
        }
        if let Some(mode) = self.backpressure {
            config.runtime.backpressure = mode;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        if self.no_write {
            config.io.no_write = true;
        }
        if self.evaluate {
            config.knn.evaluate = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_flags() {
        let args = CliArgs::try_parse_from(["stream_knn"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("stream_knn.toml"));
        assert!(args.input.is_none());
        assert!(args.k.is_none());
        assert!(!args.json_logs);
        assert!(!args.no_write);
        assert!(args.backpressure.is_none());
        assert!(!args.evaluate);
    }

    #[test]
    fn test_overrides_are_applied() {
        let args = CliArgs::try_parse_from([
            "stream_knn",
            "--config",
            "custom.toml",
            "-i",
            "points.csv",
            "--output",
            "out.tsv",
            "-k",
            "3",
            "--index-height",
            "4",
            "--boundary-scale",
            "0.5",
            "--query-quota",
            "-1",
            "--workers",
            "2",
            "--backpressure",
            "Reject",
            "--log-level",
            "debug",
            "--json-logs",
            "--no-write",
            "--evaluate",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));

        let mut config = AppConfig::default();
        config.stream.query_quota = 10;
        args.apply_to(&mut config);

        assert_eq!(config.io.input_path, "points.csv");
        assert_eq!(config.io.output_path.as_deref(), Some("out.tsv"));
        assert_eq!(config.knn.k, 3);
        assert_eq!(config.index.height, 4);
        assert_eq!(config.index.boundary_length_scale, 0.5);
        assert_eq!(config.stream.query_quota, -1);
        assert_eq!(config.runtime.partition_workers, 2);
        assert_eq!(config.runtime.backpressure, BackpressureMode::Reject);
        assert!(config.knn.evaluate);
        assert!(config.to_pipeline_config().evaluate);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(config.io.no_write);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        assert!(CliArgs::try_parse_from(["stream_knn", "-k", "many"]).is_err());
        assert!(CliArgs::try_parse_from(["stream_knn", "--backpressure", "drop"]).is_err());
    }
}
