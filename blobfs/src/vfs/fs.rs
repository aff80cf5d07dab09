//! Path-based filesystem facade over an object store.

use crate::cadapter::{ObjectBackend, ObjectClient};
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::path::{ObjectKey, PathResolver};
use crate::vfs::handle::{FileHandle, OpenMode, OpenOptions};
use crate::vfs::index::{DirectoryIndex, FileInfo};
use crate::vfs::resource::{FileResource, ResourceRegistry};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, instrument};

pub struct ObjectFs {
    config: FsConfig,
    resolver: PathResolver,
    client: ObjectClient,
    index: DirectoryIndex,
    registry: Arc<ResourceRegistry>,
}

impl ObjectFs {
    pub fn new(client: ObjectClient, config: FsConfig) -> Self {
        Self {
            resolver: PathResolver::from_config(&config),
            index: DirectoryIndex::new(client.clone(), config.separator),
            registry: Arc::new(ResourceRegistry::new()),
            client,
            config,
        }
    }

    pub fn with_backend<B: ObjectBackend + 'static>(backend: B) -> Self {
        Self::new(ObjectClient::new(backend), FsConfig::default())
    }

    pub fn client(&self) -> &ObjectClient {
        &self.client
    }

    /// Resources currently held open by handles.
    pub fn open_resources(&self) -> usize {
        self.registry.len()
    }

    fn sep(&self) -> char {
        self.config.separator
    }

    fn acquire(&self, key: &ObjectKey) -> Arc<FileResource> {
        self.registry.acquire(key, || {
            FileResource::new(
                key.clone(),
                self.client.clone(),
                self.index.clone(),
                self.config.pad_chunk_size,
            )
        })
    }

    /// Opens `path` for reading and writing, truncating or creating it.
    pub async fn create(&self, path: &str) -> FsResult<FileHandle> {
        self.open_file(
            path,
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true),
        )
        .await
    }

    pub async fn open(&self, path: &str) -> FsResult<FileHandle> {
        self.open_file(path, OpenOptions::new().read(true)).await
    }

    #[instrument(skip(self, options))]
    pub async fn open_file(&self, path: &str, options: &OpenOptions) -> FsResult<FileHandle> {
        let mode = options.mode();
        let key = match mode {
            OpenMode::ReadOnly => self.resolver.resolve_or_root(path)?,
            _ => self.resolver.resolve(path)?,
        };
        let resource = self.acquire(&key);
        // Dropping the handle on any error below releases the registry slot.
        let mut handle = FileHandle::new(
            path,
            mode,
            resource.clone(),
            self.registry.clone(),
            self.index.clone(),
        );

        match mode {
            OpenMode::ReadOnly => {
                self.stat_key(&key).await?;
            }
            OpenMode::ReadWrite => {
                self.existing_file(&key).await?;
            }
            OpenMode::WriteTruncate => {
                self.existing_file(&key).await?;
                resource.replace_empty().await?;
            }
            OpenMode::WriteCreateTruncate => {
                match self.existing_file(&key).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                resource.replace_empty().await?;
            }
            OpenMode::WriteCreate => match self.existing_file(&key).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => resource.create_empty().await?,
                Err(e) => return Err(e),
            },
            OpenMode::WriteCreateExclusive => match self.stat_key(&key).await {
                Ok(_) => return Err(FsError::PermissionDenied(key.to_string())),
                Err(e) if e.is_not_found() => resource.create_empty().await?,
                Err(e) => return Err(e),
            },
            OpenMode::Append { create } => match self.existing_file(&key).await {
                Ok(info) => handle.set_offset(info.size),
                Err(e) if e.is_not_found() && create => resource.create_empty().await?,
                Err(e) => return Err(e),
            },
        }
        debug!(%key, ?mode, "opened");
        Ok(handle)
    }

    async fn stat_key(&self, key: &ObjectKey) -> FsResult<FileInfo> {
        if let Some(resource) = self.registry.get(key) {
            resource.flush().await?;
        }
        self.index.stat(key).await
    }

    /// Stat that rejects directories.
    async fn existing_file(&self, key: &ObjectKey) -> FsResult<FileInfo> {
        let info = self.stat_key(key).await?;
        if info.is_dir() {
            return Err(FsError::IsADirectory(key.to_string()));
        }
        Ok(info)
    }

    async fn put_marker(&self, key: &ObjectKey) -> FsResult<()> {
        let marker = key.as_dir(self.sep());
        self.client.put_object(&marker, Bytes::new()).await?;
        debug!(key = %marker, "wrote directory marker");
        Ok(())
    }

    /// Creates a directory marker. Fails with `NotADirectory` when a file
    /// already holds the name.
    #[instrument(skip(self))]
    pub async fn mkdir(&self, path: &str) -> FsResult<()> {
        let key = self.resolver.resolve(path)?;
        match self.client.head(&key).await {
            Ok(_) => return Err(FsError::NotADirectory(key.to_string())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.put_marker(&key).await
    }

    /// Creates `path` and every missing ancestor, one level at a time from
    /// the root down.
    #[instrument(skip(self))]
    pub async fn mkdir_all(&self, path: &str) -> FsResult<()> {
        let key = self.resolver.resolve_or_root(path)?;
        if key.is_root() {
            return Ok(());
        }
        let sep = self.sep();
        let mut current = ObjectKey::root(key.container());
        for component in key.path().split(sep) {
            current = current.child(component, sep);
            match self.client.head(&current).await {
                Ok(_) => return Err(FsError::NotADirectory(current.to_string())),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            self.put_marker(&current).await?;
        }
        Ok(())
    }

    /// Evicts the open resource on `key` and drops its pending writes, so
    /// handles still open on it cannot recreate the object when they close.
    async fn discard(&self, key: &ObjectKey) {
        if let Some(resource) = self.registry.evict(key) {
            resource.discard().await;
        }
    }

    async fn delete_tolerant(&self, key: &ObjectKey) -> FsResult<()> {
        match self.client.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a file or an empty directory.
    #[instrument(skip(self))]
    pub async fn remove(&self, path: &str) -> FsResult<()> {
        let key = self.resolver.resolve(path)?;
        if self.index.is_directory(&key).await? {
            if !self.index.list(&key, Some(1)).await?.is_empty() {
                return Err(FsError::DirectoryNotEmpty(key.to_string()));
            }
            self.delete_tolerant(&key.as_dir(self.sep())).await?;
            self.registry.evict(&key);
        } else {
            self.discard(&key).await;
            self.client.delete(&key).await?;
        }
        info!(%key, "removed");
        Ok(())
    }

    /// Removes `path` and everything below it. A missing target is not an
    /// error.
    ///
    /// Files go first, concurrently, then directory markers deepest first,
    /// so a failure part way never leaves files under a vanished marker.
    #[instrument(skip(self))]
    pub async fn remove_all(&self, path: &str) -> FsResult<()> {
        let key = self.resolver.resolve(path)?;
        let sep = self.sep();
        let is_dir = match self.index.is_directory(&key).await {
            Ok(is_dir) => is_dir,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if !is_dir {
            self.discard(&key).await;
            self.delete_tolerant(&key).await?;
            info!(%key, "removed");
            return Ok(());
        }

        let (mut markers, files): (Vec<_>, Vec<_>) = self
            .index
            .descendants(&key)
            .await?
            .into_iter()
            .partition(|k| k.path().ends_with(sep));
        let file_count = files.len();
        for resource in self.registry.evict_tree(&key, sep) {
            resource.discard().await;
        }

        stream::iter(files)
            .map(|k| async move { self.delete_tolerant(&k).await })
            .buffer_unordered(self.config.delete_concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;

        markers.sort_by_key(|k| std::cmp::Reverse(k.depth(sep)));
        for marker in &markers {
            self.delete_tolerant(marker).await?;
        }
        self.delete_tolerant(&key.as_dir(sep)).await?;
        info!(%key, files = file_count, dirs = markers.len(), "removed tree");
        Ok(())
    }

    /// Copies `old` to `new` and deletes `old`. Not atomic: a crash between
    /// the two steps leaves both objects in place.
    #[instrument(skip(self))]
    pub async fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let src = self.resolver.resolve(old)?;
        let dst = self.resolver.resolve(new)?;
        if self.index.is_directory(&src).await? {
            return Err(FsError::IsADirectory(src.to_string()));
        }
        if src == dst {
            return Ok(());
        }
        for key in [&src, &dst] {
            if let Some(resource) = self.registry.get(key) {
                resource.flush().await?;
            }
        }
        self.client.copy(&src, &dst).await?;
        self.discard(&src).await;
        self.client.delete(&src).await?;
        self.registry.evict(&dst);
        info!(%src, %dst, "renamed");
        Ok(())
    }

    pub async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let key = self.resolver.resolve_or_root(path)?;
        self.stat_key(&key).await
    }

    pub async fn exists(&self, path: &str) -> FsResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every entry of the directory at `path`, sorted by name.
    pub async fn read_dir(&self, path: &str) -> FsResult<Vec<FileInfo>> {
        let key = self.resolver.resolve_or_root(path)?;
        if !self.index.is_directory(&key).await? {
            return Err(FsError::NotADirectory(key.to_string()));
        }
        Ok(self
            .index
            .list(&key, None)
            .await?
            .into_iter()
            .map(FileInfo::from)
            .collect())
    }

    pub async fn chmod(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::Unimplemented("chmod"))
    }

    pub async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        Err(FsError::Unimplemented("chown"))
    }

    pub async fn chtimes(&self, _path: &str, _atime: SystemTime, _mtime: SystemTime) -> FsResult<()> {
        Err(FsError::Unimplemented("chtimes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::InMemoryBackend;
    use crate::error::ErrorKind;

    fn fs() -> ObjectFs {
        ObjectFs::with_backend(InMemoryBackend::new())
    }

    async fn write_file(fs: &ObjectFs, path: &str, data: &[u8]) {
        let mut f = fs.create(path).await.unwrap();
        f.write_all(data).await.unwrap();
        f.close().await.unwrap();
    }

    async fn read_file(fs: &ObjectFs, path: &str) -> Vec<u8> {
        let mut f = fs.open(path).await.unwrap();
        let mut out = Vec::new();
        f.read_to_end(&mut out).await.unwrap();
        f.close().await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_open_modes_on_missing_object() {
        let fs = fs();
        let err = fs.open("b/missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = fs
            .open_file("b/missing", OpenOptions::new().write(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut f = fs
            .open_file("b/new", OpenOptions::new().write(true).create(true))
            .await
            .unwrap();
        f.close().await.unwrap();
        assert_eq!(fs.stat("b/new").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_create_exclusive_and_plain_create() {
        let fs = fs();
        write_file(&fs, "b/f", b"keep").await;

        let err = fs
            .open_file("b/f", OpenOptions::new().write(true).create_new(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        // plain create leaves existing content alone
        let mut f = fs
            .open_file("b/f", OpenOptions::new().write(true).create(true))
            .await
            .unwrap();
        f.close().await.unwrap();
        assert_eq!(read_file(&fs, "b/f").await, b"keep");
    }

    #[tokio::test]
    async fn test_truncating_open_empties_object() {
        let fs = fs();
        write_file(&fs, "b/f", b"content").await;
        let mut f = fs
            .open_file("b/f", OpenOptions::new().write(true).truncate(true))
            .await
            .unwrap();
        f.close().await.unwrap();
        assert!(read_file(&fs, "b/f").await.is_empty());
    }

    #[tokio::test]
    async fn test_write_modes_reject_directories() {
        let fs = fs();
        fs.mkdir("b/d").await.unwrap();
        let err = fs.create("b/d").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsADirectory);
        // the failed open must not leak a registry slot
        assert_eq!(fs.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let fs = fs();
        write_file(&fs, "b/f", b"x").await;
        let err = fs.mkdir("b/f").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotADirectory);
        let err = fs.mkdir_all("b/f/g").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn test_mkdir_all_writes_every_marker() {
        let fs = fs();
        fs.mkdir_all("b/x/y/z").await.unwrap();
        for dir in ["b/x", "b/x/y", "b/x/y/z"] {
            assert!(fs.stat(dir).await.unwrap().is_dir(), "{dir}");
        }
        let marker = ObjectKey::new("b", "x/y/");
        assert_eq!(fs.client().head(&marker).await.unwrap().size, 0);
        fs.mkdir_all("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_file_and_empty_dir() {
        let fs = fs();
        write_file(&fs, "b/f", b"x").await;
        fs.mkdir("b/d").await.unwrap();
        fs.remove("b/f").await.unwrap();
        fs.remove("b/d").await.unwrap();
        assert!(!fs.exists("b/f").await.unwrap());
        assert!(!fs.exists("b/d").await.unwrap());

        let err = fs.remove("b/f").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_remove_all_missing_is_ok() {
        fs().remove_all("b/nothing/here").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_all_deletes_tree_and_keeps_siblings() {
        let fs = fs();
        fs.mkdir_all("b/t/s/deep").await.unwrap();
        for p in ["b/t/a", "b/t/s/b", "b/t/s/deep/c", "b/tt"] {
            write_file(&fs, p, b"1").await;
        }
        fs.remove_all("b/t").await.unwrap();
        assert!(!fs.exists("b/t").await.unwrap());
        assert!(fs.exists("b/tt").await.unwrap());
        let names: Vec<_> = fs.read_dir("b").await.unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["tt"]);
    }

    #[tokio::test]
    async fn test_remove_drops_pending_writes_of_open_handle() {
        let fs = fs();
        let mut f = fs.create("b/f").await.unwrap();
        f.write_all(b"unsaved").await.unwrap();
        fs.remove("b/f").await.unwrap();
        f.close().await.unwrap();
        assert!(!fs.exists("b/f").await.unwrap());
        assert_eq!(fs.open_resources(), 0);
    }

    #[tokio::test]
    async fn test_remove_all_drops_pending_writes_under_tree() {
        let fs = fs();
        let mut f = fs.create("b/d/f").await.unwrap();
        f.write_all(b"unsaved").await.unwrap();
        let mut g = fs.create("b/d/sub/g").await.unwrap();
        g.write_all(b"unsaved").await.unwrap();

        fs.remove_all("b/d").await.unwrap();
        f.close().await.unwrap();
        g.close().await.unwrap();
        assert!(!fs.exists("b/d").await.unwrap());
        assert!(!fs.exists("b/d/f").await.unwrap());
        assert!(!fs.exists("b/d/sub/g").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_rejects_directories() {
        let fs = fs();
        write_file(&fs, "b/d/f", b"x").await;
        let err = fs.rename("b/d", "b/e").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsADirectory);
    }

    #[tokio::test]
    async fn test_rename_commits_open_writer() {
        let fs = fs();
        let mut f = fs.create("b/src").await.unwrap();
        f.write_all(b"pending").await.unwrap();
        fs.rename("b/src", "b/dst").await.unwrap();
        assert_eq!(read_file(&fs, "b/dst").await, b"pending");
        f.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_root_and_invalid_names() {
        let fs = fs();
        let info = fs.stat("s3://bucket").await.unwrap();
        assert!(info.is_dir());
        assert_eq!(info.name, "bucket");

        let err = fs.stat("/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        let err = fs.mkdir("bucket/.").await.unwrap_err();
        assert!(matches!(err, FsError::EmptyObjectName(_)));
    }

    #[tokio::test]
    async fn test_metadata_changes_are_unimplemented() {
        let fs = fs();
        let now = SystemTime::now();
        for err in [
            fs.chmod("b/f", 0o600).await.unwrap_err(),
            fs.chown("b/f", 0, 0).await.unwrap_err(),
            fs.chtimes("b/f", now, now).await.unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::Unimplemented);
        }
    }

    #[tokio::test]
    async fn test_registry_released_on_close() {
        let fs = fs();
        let mut a = fs.create("b/f").await.unwrap();
        let mut b = fs.open("b/f").await.unwrap();
        assert_eq!(fs.open_resources(), 1);
        a.close().await.unwrap();
        assert_eq!(fs.open_resources(), 1);
        b.close().await.unwrap();
        assert_eq!(fs.open_resources(), 0);
    }
}
