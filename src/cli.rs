//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// fedmeta - federated inverse-variance weighted meta-analysis
///
/// Combines per-participant summary statistics (beta and standard error
/// per feature) into one fixed-effect estimate per round, without
/// touching any participant's raw data.
///
/// Examples:
///   fedmeta --input ./site_stats
///   fedmeta --input ./rounds --num-rounds 2 --min-participants 8
///   fedmeta --input ./site_stats --format tsv --output meta.tsv
///   fedmeta --input ./site_stats --emit-dir ./aggregated
///   fedmeta --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory holding participant update files
    ///
    /// Either the files themselves (one round) or one subdirectory per
    /// round named with the round prefix (round_0, round_1, ...).
    #[arg(short, long, value_name = "DIR", required_unless_present = "init_config")]
    pub input: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Defaults to fedmeta_report.<ext> for the chosen format.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json, tsv)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write each round's aggregated update as JSON into this directory
    #[arg(long, value_name = "DIR")]
    pub emit_dir: Option<PathBuf>,

    /// Fewest participants a round may be combined with
    #[arg(long, value_name = "COUNT", env = "FEDMETA_MIN_PARTICIPANTS")]
    pub min_participants: Option<usize>,

    /// Number of rounds to aggregate (default: every round found)
    #[arg(long, value_name = "COUNT")]
    pub num_rounds: Option<usize>,

    /// Accept participants whose params_type differs within a round
    ///
    /// The first participant's tag is echoed on the result.
    #[arg(long)]
    pub lenient_params_type: bool,

    /// Number of strongest features listed per round
    #[arg(long, value_name = "COUNT")]
    pub top_hits: Option<usize>,

    /// |z| threshold for counting a feature as significant
    #[arg(long, value_name = "Z")]
    pub z_threshold: Option<f64>,

    /// Number of participant files loaded concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .fedmeta.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// List the rounds and participant files that would be aggregated
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .fedmeta.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
    /// Tab-separated combined statistics
    Tsv,
}

impl OutputFormat {
    /// File extension for reports in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Tsv => "tsv",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Input directory (empty when only --init-config was given).
    pub fn input_dir(&self) -> PathBuf {
        self.input.clone().unwrap_or_default()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.min_participants == Some(0) {
            return Err("Min participants must be at least 1".to_string());
        }

        if self.num_rounds == Some(0) {
            return Err("Number of rounds must be at least 1".to_string());
        }

        if let Some(z) = self.z_threshold {
            if !z.is_finite() || z <= 0.0 {
                return Err("Z threshold must be a positive number".to_string());
            }
        }

        let input = self.input_dir();
        if !input.exists() {
            return Err(format!("Input directory does not exist: {}", input.display()));
        }
        if !input.is_dir() {
            return Err(format!("Input path is not a directory: {}", input.display()));
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `general.verbose` from the config file; `--quiet`
    /// still wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(input: PathBuf) -> Args {
        Args {
            input: Some(input),
            output: None,
            format: OutputFormat::Markdown,
            emit_dir: None,
            min_participants: None,
            num_rounds: None,
            lenient_params_type: false,
            top_hits: None,
            z_threshold: None,
            concurrency: None,
            config: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(make_args(dir.path().to_path_buf()).validate().is_ok());
    }

    #[test]
    fn test_validation_missing_input() {
        let args = make_args(PathBuf::from("/definitely/not/here"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = make_args(dir.path().to_path_buf());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = make_args(dir.path().to_path_buf());
        args.min_participants = Some(0);
        assert!(args.validate().is_err());

        args.min_participants = None;
        args.num_rounds = Some(0);
        assert!(args.validate().is_err());

        args.num_rounds = None;
        args.z_threshold = Some(-1.0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "fedmeta",
            "--input",
            "stats",
            "--format",
            "tsv",
            "--num-rounds",
            "3",
            "--lenient-params-type",
        ])
        .unwrap();

        assert_eq!(args.format, OutputFormat::Tsv);
        assert_eq!(args.num_rounds, Some(3));
        assert!(args.lenient_params_type);
        assert_eq!(args.format.extension(), "tsv");
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(PathBuf::from("."));
        assert_eq!(args.log_level(false), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(false), tracing::Level::ERROR);
    }

    #[test]
    fn test_config_verbose_raises_log_level() {
        let mut args = make_args(PathBuf::from("."));
        let config: crate::config::Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        assert_eq!(args.log_level(config.general.verbose), tracing::Level::DEBUG);

        args.quiet = true;
        assert_eq!(args.log_level(config.general.verbose), tracing::Level::ERROR);
    }
}
