//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.fedmeta.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".fedmeta.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of participant files loaded concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "fedmeta_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Round and aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Fewest participants a round may be combined with.
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,

    /// Number of rounds to run (all discovered rounds when unset).
    #[serde(default)]
    pub num_rounds: Option<usize>,

    /// Reject rounds whose participants disagree on params_type.
    #[serde(default = "default_true")]
    pub strict_params_type: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_participants: default_min_participants(),
            num_rounds: None,
            strict_params_type: true,
        }
    }
}

fn default_min_participants() -> usize {
    1
}

/// Participant file discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Prefix of per-round subdirectory names.
    #[serde(default = "default_round_prefix")]
    pub round_prefix: String,

    /// Participant file extensions.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Names to skip; matched against the whole file name or any
    /// dot-separated part of it.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum participant file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            round_prefix: default_round_prefix(),
            extensions: default_extensions(),
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_round_prefix() -> String {
    "round".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["json".to_string()]
}

fn default_excludes() -> Vec<String> {
    vec!["aggregated", "fedmeta_report"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_file_size() -> u64 {
    512 * 1024 * 1024 // 512MB; a few million variants per participant
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of strongest features listed per round.
    #[serde(default = "default_top_hits")]
    pub top_hits: usize,

    /// |z| at or above which a feature counts as significant.
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_hits: default_top_hits(),
            z_threshold: default_z_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_top_hits() -> usize {
    10
}

fn default_z_threshold() -> f64 {
    crate::analysis::stats::GENOME_WIDE_Z
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values the user passed explicitly override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(min) = args.min_participants {
            self.aggregation.min_participants = min;
        }
        if args.num_rounds.is_some() {
            self.aggregation.num_rounds = args.num_rounds;
        }
        if args.lenient_params_type {
            self.aggregation.strict_params_type = false;
        }

        if let Some(top) = args.top_hits {
            self.report.top_hits = top;
        }
        if let Some(z) = args.z_threshold {
            self.report.z_threshold = z;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
