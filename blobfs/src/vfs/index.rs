//! Directory semantics derived from a flat key space.
//!
//! A key is a file when a head lookup finds it. Otherwise it is a directory
//! when anything lives below `key + separator`: either an explicit
//! zero-length marker object or just deeper keys (a virtual folder).

use crate::cadapter::{ListEntry, ObjectAttrs, ObjectClient};
use crate::config::{FILE_MODE, FOLDER_MODE, FOLDER_SIZE};
use crate::error::{FsError, FsResult};
use crate::path::ObjectKey;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub kind: FileType,
}

impl FileInfo {
    pub fn file(name: impl Into<String>, attrs: &ObjectAttrs) -> Self {
        Self {
            name: name.into(),
            size: attrs.size,
            modified: attrs.modified,
            kind: FileType::File,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: FOLDER_SIZE,
            modified: UNIX_EPOCH,
            kind: FileType::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    pub fn permissions(&self) -> u32 {
        match self.kind {
            FileType::Dir => FOLDER_MODE,
            FileType::File => FILE_MODE,
        }
    }
}

/// One child produced by a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirEntry {
    Object {
        name: String,
        size: u64,
        modified: SystemTime,
    },
    /// Virtual subfolder (a common prefix or a directory marker).
    Prefix { name: String },
}

impl DirEntry {
    pub fn name(&self) -> &str {
        match self {
            DirEntry::Object { name, .. } | DirEntry::Prefix { name } => name,
        }
    }

    pub fn kind(&self) -> FileType {
        match self {
            DirEntry::Object { .. } => FileType::File,
            DirEntry::Prefix { .. } => FileType::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileType::Dir
    }
}

impl From<DirEntry> for FileInfo {
    fn from(entry: DirEntry) -> Self {
        match entry {
            DirEntry::Object {
                name,
                size,
                modified,
            } => FileInfo {
                name,
                size,
                modified,
                kind: FileType::File,
            },
            DirEntry::Prefix { name } => FileInfo::dir(name),
        }
    }
}

#[derive(Clone)]
pub struct DirectoryIndex {
    client: ObjectClient,
    separator: char,
}

impl DirectoryIndex {
    pub fn new(client: ObjectClient, separator: char) -> Self {
        Self { client, separator }
    }

    /// `Ok(false)` for a file, `Ok(true)` for a marker-backed or virtual
    /// directory, `NotFound` when neither exists.
    pub async fn is_directory(&self, key: &ObjectKey) -> FsResult<bool> {
        if key.is_root() {
            return Ok(true);
        }
        match self.client.head(key).await {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => {
                if self.has_entries(key).await? {
                    Ok(true)
                } else {
                    Err(FsError::NotFound(key.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stat(&self, key: &ObjectKey) -> FsResult<FileInfo> {
        let name = key.base_name(self.separator).to_string();
        if key.is_root() {
            return Ok(FileInfo::dir(name));
        }
        match self.client.head(key).await {
            Ok(attrs) => Ok(FileInfo::file(name, &attrs)),
            Err(e) if e.is_not_found() => {
                if self.has_entries(key).await? {
                    Ok(FileInfo::dir(name))
                } else {
                    Err(FsError::NotFound(key.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn has_entries(&self, key: &ObjectKey) -> FsResult<bool> {
        let prefix = key.as_dir(self.separator);
        Ok(!self
            .client
            .list(&prefix, Some(self.separator))
            .await?
            .is_empty())
    }

    /// Direct children of `dir`, sorted by name, then cut to `limit`.
    ///
    /// Sorting has to come first: stores do not list in name order, so
    /// truncating an unsorted listing would return an arbitrary subset.
    pub async fn list(&self, dir: &ObjectKey, limit: Option<usize>) -> FsResult<Vec<DirEntry>> {
        let sep = self.separator;
        let prefix = dir.as_dir(sep);
        let own_key = dir.path().trim_end_matches(sep);
        let raw = self.client.list(&prefix, Some(sep)).await?;

        let mut entries: Vec<DirEntry> = raw
            .into_iter()
            .filter_map(|entry| {
                let (key, is_prefix) = match &entry {
                    ListEntry::Object { key, .. } => (key.as_str(), false),
                    ListEntry::CommonPrefix(p) => (p.as_str(), true),
                };
                // the directory's own marker comes back under its own prefix
                if key.trim_end_matches(sep) == own_key {
                    return None;
                }
                let name = key
                    .strip_prefix(prefix.path())
                    .unwrap_or(key)
                    .trim_end_matches(sep);
                if name.is_empty() {
                    return None;
                }
                let name = name.to_string();
                Some(match entry {
                    ListEntry::Object { attrs, .. } if !is_prefix => DirEntry::Object {
                        name,
                        size: attrs.size,
                        modified: attrs.modified,
                    },
                    _ => DirEntry::Prefix { name },
                })
            })
            .collect();

        entries.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Every key below `dir` at any depth, markers included, the directory's
    /// own marker excluded.
    pub async fn descendants(&self, dir: &ObjectKey) -> FsResult<Vec<ObjectKey>> {
        let prefix = dir.as_dir(self.separator);
        let raw = self.client.list(&prefix, None).await?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| match entry {
                ListEntry::Object { key, .. } if key != prefix.path() => {
                    Some(ObjectKey::new(dir.container(), key))
                }
                _ => None,
            })
            .collect())
    }
}
