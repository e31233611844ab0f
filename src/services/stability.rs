//! Waits for a transcript file to stop changing before it is analyzed.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Retry cycles after the first unstable comparison.
const RETRIES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    modified: Option<SystemTime>,
    size: u64,
}

async fn sample(path: &Path) -> Option<Sample> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    Some(Sample {
        modified: metadata.modified().ok(),
        size: metadata.len(),
    })
}

/// Returns true once `path` keeps the same mtime and size across `cooldown`.
///
/// Gives up after one retry cycle, so a file that is still being written
/// returns false and is left for a later poll. A missing file is never stable.
pub async fn wait_for_stable(path: &Path, cooldown: Duration) -> bool {
    let Some(mut previous) = sample(path).await else {
        return false;
    };

    for attempt in 0..=RETRIES {
        tokio::time::sleep(cooldown).await;
        let Some(current) = sample(path).await else {
            return false;
        };
        if current == previous {
            return true;
        }
        debug!(path = %path.display(), attempt, "file still changing");
        previous = current;
    }
    false
}
