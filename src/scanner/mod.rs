//! Round and participant file discovery.
//!
//! An input directory either holds participant update files directly
//! (a single round) or one subdirectory per round whose name starts with
//! the configured round prefix.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Prefix of round directory names (e.g. "round")
    pub round_prefix: String,
    /// File extensions to include (e.g. ["json"])
    pub extensions: Vec<String>,
    /// Names to exclude
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&crate::config::ScannerConfig::default())
    }
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            round_prefix: config.round_prefix.clone(),
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
        }
    }
}

/// One round to aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPlan {
    /// Position of the round in the run (0-based).
    pub index: usize,
    /// Display name (directory name, or the prefix for a flat layout).
    pub name: String,
    /// Participant update files, sorted by file name.
    pub participants: Vec<PathBuf>,
}

/// Scanner for rounds and participant files.
pub struct RoundScanner {
    config: ScanConfig,
    input_root: PathBuf,
}

impl RoundScanner {
    /// Create a new scanner.
    pub fn new(input_root: PathBuf, config: ScanConfig) -> Self {
        Self { config, input_root }
    }

    /// Discover every round under the input root.
    pub fn scan(&self) -> Result<Vec<RoundPlan>> {
        let round_dirs = self.round_dirs()?;

        if round_dirs.is_empty() {
            debug!("No round directories, treating {} as one round", self.input_root.display());
            return Ok(vec![RoundPlan {
                index: 0,
                name: self.config.round_prefix.clone(),
                participants: self.participant_files(&self.input_root)?,
            }]);
        }

        let stray = self.ignored_root_files(&round_dirs)?;
        if !stray.is_empty() {
            warn!(
                "Ignoring {} participant files in {} because round directories exist",
                stray.len(),
                self.input_root.display()
            );
        }

        round_dirs
            .into_iter()
            .enumerate()
            .map(|(index, (path, name))| {
                Ok(RoundPlan {
                    index,
                    name,
                    participants: self.participant_files(&path)?,
                })
            })
            .collect()
    }

    /// Participant files at the input root that a round layout leaves out.
    fn ignored_root_files(&self, round_dirs: &[(PathBuf, String)]) -> Result<Vec<PathBuf>> {
        if round_dirs.is_empty() {
            return Ok(Vec::new());
        }
        self.participant_files(&self.input_root)
    }

    /// Immediate subdirectories named like rounds, in round order.
    fn round_dirs(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut dirs = Vec::new();

        for entry in WalkDir::new(&self.input_root).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| {
                format!("Failed to read input directory: {}", self.input_root.display())
            })?;
            let name = entry.file_name().to_string_lossy().to_string();

            if entry.file_type().is_dir()
                && name.starts_with(&self.config.round_prefix)
                && !self.is_excluded(&name)
            {
                dirs.push((entry.into_path(), name));
            }
        }

        let prefix_len = self.config.round_prefix.len();
        dirs.sort_by_key(|(_, name)| {
            let number = round_number(&name[prefix_len..]);
            (number.is_none(), number, name.clone())
        });

        Ok(dirs)
    }

    /// Participant files directly inside `dir`.
    fn participant_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("Failed to read round directory: {}", dir.display()))?;

            if entry.file_type().is_file() && self.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Check if a file matches scan criteria.
    pub fn matches(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.is_excluded(name) {
                return false;
            }
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.config.extensions.iter().any(|e| e == ext) {
            return false;
        }

        match std::fs::metadata(path) {
            Ok(metadata) if metadata.len() > self.config.max_file_size => {
                warn!(
                    "Skipping {} ({} bytes exceeds limit of {})",
                    path.display(),
                    metadata.len(),
                    self.config.max_file_size
                );
                false
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }

    /// Check if a name matches exclusion patterns.
    fn is_excluded(&self, name: &str) -> bool {
        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        self.config
            .excludes
            .iter()
            .any(|pattern| name == pattern || name.split('.').any(|part| part == pattern))
    }
}

/// Trailing round number of a directory suffix such as "_3" or "-12".
fn round_number(suffix: &str) -> Option<u64> {
    suffix
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}

/// Keep the first `num_rounds` rounds, failing if fewer were found.
pub fn limit_rounds(mut plans: Vec<RoundPlan>, num_rounds: Option<usize>) -> Result<Vec<RoundPlan>> {
    if let Some(wanted) = num_rounds {
        if plans.len() < wanted {
            bail!("Requested {} rounds but only {} found", wanted, plans.len());
        }
        plans.truncate(wanted);
    }
    Ok(plans)
}
