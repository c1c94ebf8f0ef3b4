//! Local directory listing.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{FileEntry, FileType};
use crate::error::Result;

/// Lists `path`, skipping entries whose metadata cannot be read.
pub async fn list_dir(path: &Path) -> Result<Vec<FileEntry>> {
    let mut read_dir = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            file_type: if is_dir {
                FileType::Directory
            } else {
                FileType::File
            },
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::UNIX_EPOCH),
        });
    }

    debug!("Local listing of {}: {} entries", path.display(), entries.len());
    Ok(entries)
}
