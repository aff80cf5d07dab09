//! Per-object read/write cursor emulating in-place file I/O.
//!
//! Object stores only replace whole objects, so every partial write is
//! rebuilt from the previous generation: the untouched prefix is copied into
//! a fresh writer before the new bytes, and the untouched suffix is copied
//! after them when the writer is closed. This relies on read-after-write
//! consistency; a store that serves stale reads right after a PUT will lose
//! data when the next mutation reconstructs from the old generation.

use crate::cadapter::{ObjectClient, ObjectReader, ObjectWriter};
use crate::error::{FsError, FsResult};
use crate::path::ObjectKey;
use crate::vfs::index::DirectoryIndex;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Cursor state; at most one of `reader`/`writer` is open.
#[derive(Default)]
struct IoState {
    offset: u64,
    reader: Option<ObjectReader>,
    writer: Option<ObjectWriter>,
    /// Size of the generation the open writer is replacing.
    remote_size: u64,
}

pub struct FileResource {
    key: ObjectKey,
    client: ObjectClient,
    index: DirectoryIndex,
    pad_chunk_size: usize,
    state: Mutex<IoState>,
}

impl FileResource {
    pub fn new(
        key: ObjectKey,
        client: ObjectClient,
        index: DirectoryIndex,
        pad_chunk_size: usize,
    ) -> Self {
        Self {
            key,
            client,
            index,
            pad_chunk_size: pad_chunk_size.max(1),
            state: Mutex::new(IoState::default()),
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let mut st = self.state.lock().await;
        if st.reader.is_none() || st.offset != offset {
            if st.reader.is_none()
                && st.writer.is_none()
                && self.index.is_directory(&self.key).await?
            {
                return Err(FsError::IsADirectory(self.key.to_string()));
            }
            self.close_io(&mut st).await?;
            let reader = self.client.get_range(&self.key, offset, None).await?;
            st.reader = Some(reader);
            st.offset = offset;
        }
        let n = match st.reader.as_mut() {
            Some(reader) => reader.read(buf).await?,
            None => 0,
        };
        st.offset += n as u64;
        Ok(n)
    }

    pub async fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        let mut st = self.state.lock().await;
        if st.writer.is_none() || st.offset != offset {
            self.close_io(&mut st).await?;
            let size = match self.client.head(&self.key).await {
                Ok(attrs) => attrs.size,
                Err(e) if e.is_not_found() && offset == 0 => 0,
                Err(e) if e.is_not_found() => {
                    return Err(FsError::OutOfRange(format!(
                        "{}: write at {offset} to missing object",
                        self.key
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            if offset > size {
                return Err(FsError::OutOfRange(format!(
                    "{}: write at {offset} past size {size}",
                    self.key
                )));
            }

            let mut writer = self.client.new_writer(&self.key);
            if offset > 0 {
                let mut prefix = self.client.get_range(&self.key, 0, Some(offset)).await?;
                let copied = tokio::io::copy(&mut prefix, &mut writer).await?;
                if copied != offset {
                    return Err(FsError::OutOfRange(format!(
                        "{}: object shrank to {copied} bytes during write",
                        self.key
                    )));
                }
                trace!(key = %self.key, copied, "copied unchanged prefix");
            }
            st.remote_size = size;
            st.offset = offset;
            st.writer = Some(writer);
        }
        if let Some(writer) = st.writer.as_mut() {
            writer.write(buf);
        }
        st.offset += buf.len() as u64;
        Ok(buf.len())
    }

    /// Truncates or extends the object to `size` bytes; growth is padded
    /// with spaces.
    pub async fn truncate(&self, size: i64) -> FsResult<()> {
        if size < 0 {
            return Err(FsError::OutOfRange(format!(
                "{}: negative truncate size {size}",
                self.key
            )));
        }
        let size = size as u64;
        let mut st = self.state.lock().await;
        self.close_io(&mut st).await?;

        let mut writer = self.client.new_writer(&self.key);
        let mut head = self.client.get_range(&self.key, 0, Some(size)).await?;
        let mut written = tokio::io::copy(&mut head, &mut writer).await?;
        if written < size {
            let padding = vec![b' '; self.pad_chunk_size];
            while written < size {
                let n = (size - written).min(self.pad_chunk_size as u64) as usize;
                writer.write(&padding[..n]);
                written += n as u64;
            }
        }
        writer.close().await?;
        debug!(key = %self.key, size, "truncated");
        st.offset = 0;
        st.remote_size = size;
        Ok(())
    }

    /// Commits pending writes and drops any open reader.
    pub async fn flush(&self) -> FsResult<()> {
        let mut st = self.state.lock().await;
        self.close_io(&mut st).await
    }

    /// Current remote size, after committing pending writes.
    pub async fn size(&self) -> FsResult<u64> {
        self.flush().await?;
        Ok(self.client.head(&self.key).await?.size)
    }

    /// Writes an empty object without looking at what was there.
    pub async fn create_empty(&self) -> FsResult<()> {
        let mut st = self.state.lock().await;
        st.reader = None;
        st.writer = None;
        self.client.put_object(&self.key, Bytes::new()).await?;
        *st = IoState::default();
        Ok(())
    }

    /// Deletes the current generation and replaces it with an empty object.
    /// Pending writes from other handles are committed first so they are
    /// not silently resurrected later.
    pub async fn replace_empty(&self) -> FsResult<()> {
        let mut st = self.state.lock().await;
        self.close_io(&mut st).await?;
        match self.client.delete(&self.key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.client.put_object(&self.key, Bytes::new()).await?;
        *st = IoState::default();
        Ok(())
    }

    /// Drops the open reader and any uncommitted writes. Used when the
    /// object is removed so a later close cannot bring it back.
    pub async fn discard(&self) {
        let mut st = self.state.lock().await;
        if st.writer.is_some() {
            debug!(key = %self.key, "discarded pending writes");
        }
        *st = IoState::default();
    }

    async fn close_io(&self, st: &mut IoState) -> FsResult<()> {
        st.reader = None;
        let Some(mut writer) = st.writer.take() else {
            return Ok(());
        };
        // Without this tail copy a write that stops short of the old end
        // would truncate the object.
        if st.offset < st.remote_size {
            let mut tail = self.client.get_range(&self.key, st.offset, None).await?;
            let copied = tokio::io::copy(&mut tail, &mut writer).await?;
            trace!(key = %self.key, from = st.offset, copied, "copied unchanged tail");
        }
        let size = writer.close().await?;
        debug!(key = %self.key, size, "committed object");
        st.remote_size = size;
        Ok(())
    }
}

struct RegistryEntry {
    resource: Arc<FileResource>,
    handles: usize,
}

/// Open resources keyed by object, shared by every handle on the same key.
///
/// Entries are reference counted by open handles and dropped when the last
/// handle closes; remove and rename evict them eagerly. A handle whose
/// resource was evicted keeps using it until it is closed.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: StdMutex<HashMap<ObjectKey, RegistryEntry>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ObjectKey, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the shared resource for `key`, creating it with `make` on
    /// first use, and counts one more handle against it.
    pub fn acquire(
        &self,
        key: &ObjectKey,
        make: impl FnOnce() -> FileResource,
    ) -> Arc<FileResource> {
        let mut entries = self.entries();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| RegistryEntry {
                resource: Arc::new(make()),
                handles: 0,
            });
        entry.handles += 1;
        entry.resource.clone()
    }

    /// Drops one handle reference. Ignored when `resource` was evicted and
    /// replaced in the meantime.
    pub fn release(&self, resource: &Arc<FileResource>) {
        let mut entries = self.entries();
        let key = resource.key();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !Arc::ptr_eq(&entry.resource, resource) {
            return;
        }
        entry.handles = entry.handles.saturating_sub(1);
        if entry.handles == 0 {
            entries.remove(key);
            trace!(%key, "released resource");
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<FileResource>> {
        self.entries().get(key).map(|e| e.resource.clone())
    }

    pub fn evict(&self, key: &ObjectKey) -> Option<Arc<FileResource>> {
        let evicted = self.entries().remove(key).map(|e| e.resource);
        if evicted.is_some() {
            debug!(%key, "evicted resource");
        }
        evicted
    }

    /// Evicts `dir` and every resource below it, returning what was evicted.
    pub fn evict_tree(&self, dir: &ObjectKey, sep: char) -> Vec<Arc<FileResource>> {
        let mut entries = self.entries();
        let keys: Vec<ObjectKey> = entries
            .keys()
            .filter(|key| *key == dir || key.is_under(dir, sep))
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|key| entries.remove(key))
            .map(|e| e.resource)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::InMemoryBackend;
    use crate::error::ErrorKind;

    fn setup(content: Option<&'static [u8]>) -> (FileResource, ObjectClient, ObjectKey) {
        let client = ObjectClient::new(InMemoryBackend::new());
        let key = ObjectKey::new("bkt", "dir/file.txt");
        let res = FileResource::new(
            key.clone(),
            client.clone(),
            DirectoryIndex::new(client.clone(), '/'),
            4,
        );
        if let Some(content) = content {
            futures::executor::block_on(client.put_object(&key, Bytes::from_static(content)))
                .unwrap();
        }
        (res, client, key)
    }

    async fn content(client: &ObjectClient, key: &ObjectKey) -> Vec<u8> {
        let mut out = Vec::new();
        client
            .get_range(key, 0, None)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_write_in_middle_keeps_prefix_and_tail() {
        let (res, client, key) = setup(Some(b"0123456789"));
        res.write_at(b"ab", 3).await.unwrap();
        res.flush().await.unwrap();
        assert_eq!(content(&client, &key).await, b"012ab56789");
    }

    #[tokio::test]
    async fn test_write_past_end_extends() {
        let (res, client, key) = setup(Some(b"hello"));
        res.write_at(b" world", 5).await.unwrap();
        res.flush().await.unwrap();
        assert_eq!(content(&client, &key).await, b"hello world");

        res.write_at(b"p!", 4).await.unwrap();
        res.flush().await.unwrap();
        assert_eq!(content(&client, &key).await, b"hellp!world");
    }

    #[tokio::test]
    async fn test_sequential_writes_reuse_writer() {
        let (res, client, key) = setup(Some(b"abcdefgh"));
        res.write_at(b"XY", 2).await.unwrap();
        res.write_at(b"Z", 4).await.unwrap();
        // nothing is committed until the writer closes
        assert_eq!(content(&client, &key).await, b"abcdefgh");
        res.flush().await.unwrap();
        assert_eq!(content(&client, &key).await, b"abXYZfgh");
    }

    #[tokio::test]
    async fn test_write_offset_rules() {
        let (res, _, _) = setup(None);
        let err = res.write_at(b"x", 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        res.write_at(b"x", 0).await.unwrap();
        res.flush().await.unwrap();

        let err = res.write_at(b"y", 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn test_read_after_write_commits_first() {
        let (res, _, _) = setup(Some(b"hello"));
        res.write_at(b"J", 0).await.unwrap();
        let mut buf = [0u8; 16];
        let n = res.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(&buf[..n], b"Jello");
        assert_eq!(res.read_at(&mut buf, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_missing_and_directory() {
        let (res, client, _) = setup(None);
        let mut buf = [0u8; 4];
        let err = res.read_at(&mut buf, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        client
            .put_object(&ObjectKey::new("bkt", "dir/file.txt/child"), Bytes::new())
            .await
            .unwrap();
        let err = res.read_at(&mut buf, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsADirectory);
    }

    #[tokio::test]
    async fn test_truncate_shrinks_and_pads() {
        let (res, client, key) = setup(Some(b"hello world"));
        res.truncate(5).await.unwrap();
        assert_eq!(content(&client, &key).await, b"hello");

        // pad chunk is 4 bytes, so 6 bytes of padding take two writes
        res.truncate(11).await.unwrap();
        assert_eq!(content(&client, &key).await, b"hello      ");

        let err = res.truncate(-1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn test_replace_empty_commits_then_clears() {
        let (res, client, key) = setup(Some(b"data"));
        res.write_at(b"more", 4).await.unwrap();
        res.replace_empty().await.unwrap();
        assert!(content(&client, &key).await.is_empty());
        assert_eq!(res.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discard_drops_pending_writes() {
        let (res, client, key) = setup(Some(b"old"));
        res.write_at(b"new data", 0).await.unwrap();
        res.discard().await;
        res.flush().await.unwrap();
        assert_eq!(content(&client, &key).await, b"old");
    }

    #[test]
    fn test_registry_refcounts_and_evicts() {
        let (res, _, key) = setup(None);
        let registry = ResourceRegistry::new();
        let mut made = Some(res);
        let a = registry.acquire(&key, || made.take().unwrap());
        let b = registry.acquire(&key, || unreachable!("resource is shared"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        registry.release(&a);
        assert!(registry.get(&key).is_some());
        registry.release(&b);
        assert!(registry.is_empty());

        let (res2, _, _) = setup(None);
        let c = registry.acquire(&key, || res2);
        assert!(registry.evict(&key).is_some());
        // releasing an evicted resource must not underflow or remove a newer one
        registry.release(&c);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_evict_tree() {
        let registry = ResourceRegistry::new();
        let client = ObjectClient::new(InMemoryBackend::new());
        let index = DirectoryIndex::new(client.clone(), '/');
        for p in ["a", "a/x", "a/y/z", "ab"] {
            let key = ObjectKey::new("bkt", p);
            registry.acquire(&key, || {
                FileResource::new(key.clone(), client.clone(), index.clone(), 16)
            });
        }
        let evicted = registry.evict_tree(&ObjectKey::new("bkt", "a"), '/');
        assert_eq!(evicted.len(), 3);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&ObjectKey::new("bkt", "ab")).is_some());
    }
}
