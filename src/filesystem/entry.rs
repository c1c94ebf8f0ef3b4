//! Normalized directory entries.
//!
//! Local and remote listings are reported in the same shape regardless of the
//! source or of the transport's own type tags.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A listing row as the transfer protocol reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// `d` for directories, `-` for regular files, `l` for links.
    pub kind: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub modify_time: i64,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, size: u64, modify_time: i64) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            size,
            modify_time,
        }
    }
}

impl From<RemoteEntry> for FileEntry {
    fn from(entry: RemoteEntry) -> Self {
        // only an explicit directory tag counts; links are reported as files
        let file_type = if entry.kind == "d" {
            FileType::Directory
        } else {
            FileType::File
        };
        FileEntry {
            name: entry.name,
            file_type,
            size: entry.size,
            modified: DateTime::from_timestamp_millis(entry.modify_time)
                .unwrap_or(DateTime::UNIX_EPOCH),
        }
    }
}

pub fn normalize(entries: Vec<RemoteEntry>) -> Vec<FileEntry> {
    entries.into_iter().map(FileEntry::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type_tags() {
        let t1 = 1_700_000_000_000;
        let t2 = 1_700_000_500_000;
        let entries = normalize(vec![
            RemoteEntry::new("a.txt", "-", 120, t1),
            RemoteEntry::new("sub", "d", 4096, t2),
            RemoteEntry::new("current", "l", 7, t2),
        ]);

        assert_eq!(entries[0].file_type, FileType::File);
        assert_eq!(entries[0].size, 120);
        assert_eq!(entries[0].modified.timestamp_millis(), t1);
        assert_eq!(entries[1].file_type, FileType::Directory);
        assert_eq!(entries[1].modified.timestamp_millis(), t2);
        assert_eq!(entries[2].file_type, FileType::File);
    }

    #[test]
    fn test_entry_wire_shape() {
        let entry = FileEntry::from(RemoteEntry::new("sub", "d", 4096, 0));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "sub");
        assert_eq!(json["type"], "directory");
        assert_eq!(json["size"], 4096);
        assert_eq!(json["modified"], "1970-01-01T00:00:00Z");
    }
}
