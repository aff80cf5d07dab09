//! Per-open file handles.

use crate::error::{FsError, FsResult};
use crate::path::ObjectKey;
use crate::vfs::index::{DirEntry, DirectoryIndex, FileInfo};
use crate::vfs::resource::{FileResource, ResourceRegistry};
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::warn;

const READ_CHUNK: usize = 64 * 1024;

/// How a handle was opened, decided once from [`OpenOptions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    WriteCreate,
    WriteCreateTruncate,
    WriteCreateExclusive,
    WriteTruncate,
    Append { create: bool },
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        self != OpenMode::ReadOnly
    }
}

/// Builder for [`OpenMode`], shaped like `std::fs::OpenOptions`.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    /// Fail if the object already exists.
    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    /// Append wins over truncate; no flags at all means read-only.
    pub fn mode(&self) -> OpenMode {
        if self.append {
            return OpenMode::Append {
                create: self.create || self.create_new,
            };
        }
        match (self.create_new, self.create, self.truncate, self.write) {
            (true, _, _, _) => OpenMode::WriteCreateExclusive,
            (false, true, true, _) => OpenMode::WriteCreateTruncate,
            (false, true, false, _) => OpenMode::WriteCreate,
            (false, false, true, _) => OpenMode::WriteTruncate,
            (false, false, false, true) => OpenMode::ReadWrite,
            (false, false, false, false) => OpenMode::ReadOnly,
        }
    }
}

struct DirCursor {
    entries: Vec<DirEntry>,
    pos: usize,
}

/// An open file or directory.
///
/// Byte operations go through the [`FileResource`] shared by every handle on
/// the same key; the offset and the directory cursor are private to the
/// handle. Call [`FileHandle::close`] to commit pending writes: dropping an
/// unclosed handle only releases its registry slot.
pub struct FileHandle {
    name: String,
    key: ObjectKey,
    mode: OpenMode,
    offset: u64,
    resource: Option<Arc<FileResource>>,
    registry: Arc<ResourceRegistry>,
    index: DirectoryIndex,
    dir_cursor: Option<DirCursor>,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl FileHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        mode: OpenMode,
        resource: Arc<FileResource>,
        registry: Arc<ResourceRegistry>,
        index: DirectoryIndex,
    ) -> Self {
        Self {
            name: name.into(),
            key: resource.key().clone(),
            mode,
            offset: 0,
            resource: Some(resource),
            registry,
            index,
            dir_cursor: None,
        }
    }

    /// The path this handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn resource(&self) -> FsResult<&Arc<FileResource>> {
        self.resource.as_ref().ok_or(FsError::AlreadyClosed)
    }

    fn writable(&self) -> FsResult<&Arc<FileResource>> {
        let resource = self.resource()?;
        if !self.mode.is_writable() {
            return Err(FsError::PermissionDenied(self.name.clone()));
        }
        Ok(resource)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.resource()?.read_at(buf, self.offset).await?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Reads at `offset` without moving the handle offset.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.resource()?.read_at(buf, offset).await
    }

    /// Reads from the current offset to the end of the object.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> FsResult<usize> {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    pub async fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let n = self.writable()?.write_at(buf, self.offset).await?;
        self.offset += n as u64;
        Ok(n)
    }

    pub async fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        self.writable()?.write_at(buf, offset).await
    }

    pub async fn write_all(&mut self, mut buf: &[u8]) -> FsResult<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let resource = self.resource()?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => resource.size().await?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            FsError::OutOfRange(format!("{}: seek to {pos:?}", self.name))
        })?;
        self.offset = target;
        Ok(target)
    }

    pub async fn truncate(&self, size: i64) -> FsResult<()> {
        self.writable()?.truncate(size).await
    }

    /// Next directory entries. `Some(n)` returns at most `n` entries and an
    /// empty vector once the listing is exhausted; `None` returns everything
    /// left. The listing is taken on the first call and paged from memory.
    pub async fn readdir(&mut self, count: Option<usize>) -> FsResult<Vec<FileInfo>> {
        self.resource()?;
        if self.dir_cursor.is_none() {
            if !self.index.is_directory(&self.key).await? {
                return Err(FsError::NotADirectory(self.name.clone()));
            }
            let entries = self.index.list(&self.key, None).await?;
            self.dir_cursor = Some(DirCursor { entries, pos: 0 });
        }
        let Some(cursor) = self.dir_cursor.as_mut() else {
            return Ok(Vec::new());
        };
        let remaining = cursor.entries.len() - cursor.pos;
        let take = count.map_or(remaining, |n| n.min(remaining));
        let page = cursor.entries[cursor.pos..cursor.pos + take]
            .iter()
            .cloned()
            .map(FileInfo::from)
            .collect();
        cursor.pos += take;
        Ok(page)
    }

    pub async fn readdir_names(&mut self, count: Option<usize>) -> FsResult<Vec<String>> {
        Ok(self
            .readdir(count)
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect())
    }

    /// Commits pending writes, then reports the object's attributes.
    pub async fn stat(&self) -> FsResult<FileInfo> {
        self.resource()?.flush().await?;
        self.index.stat(&self.key).await
    }

    /// Commits pending writes without closing the handle.
    pub async fn sync(&self) -> FsResult<()> {
        self.resource()?.flush().await
    }

    /// Commits pending writes and releases the handle. A second close fails
    /// with `AlreadyClosed`.
    pub async fn close(&mut self) -> FsResult<()> {
        let resource = self.resource.take().ok_or(FsError::AlreadyClosed)?;
        let result = resource.flush().await;
        self.registry.release(&resource);
        self.dir_cursor = None;
        result
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if self.mode.is_writable() {
                warn!(key = %self.key, "file handle dropped without close");
            }
            self.registry.release(&resource);
        }
    }
}
