//! Participant update loading.

use crate::models::ParticipantUpdate;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read and parse one participant update file.
pub async fn load_update(path: &Path) -> Result<ParticipantUpdate> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read participant file: {}", path.display()))?;

    let update: ParticipantUpdate = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse participant file: {}", path.display()))?;

    debug!("Loaded {}", path.display());
    Ok(update)
}

/// Load several files with at most `concurrency` reads in flight.
///
/// Updates are returned in the order of `paths`.
pub async fn load_all(
    paths: &[PathBuf],
    concurrency: usize,
    progress: &ProgressBar,
) -> Result<Vec<ParticipantUpdate>> {
    stream::iter(paths)
        .map(|path| load_update(path))
        .buffered(concurrency.max(1))
        .inspect(|_| progress.inc(1))
        .try_collect()
        .await
}
