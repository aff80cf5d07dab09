//! High-level client API for the object store
//!
//! `ObjectBackend` is the minimal contract every store adapter implements:
//! head, ranged get, whole-object put, delete, prefix listing and copy.
//! `ObjectClient` wraps a backend and is what the filesystem layer talks to;
//! it also hands out `ObjectWriter`s, which buffer bytes client-side and only
//! publish them as the new object generation on `close()`.

use crate::path::ObjectKey;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Byte stream returned by a ranged read.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(ObjectKey),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Backend(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Metadata returned by a head lookup or a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub size: u64,
    pub modified: SystemTime,
}

/// One item of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// A stored object; `key` is the full object path inside the container.
    Object { key: String, attrs: ObjectAttrs },
    /// A delimiter-terminated prefix shared by at least one deeper key.
    CommonPrefix(String),
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn head_object(&self, key: &ObjectKey) -> StoreResult<ObjectAttrs>;

    /// Reads `length` bytes starting at `offset`, or everything after `offset`
    /// when `length` is `None`. Reading at or past the end yields an empty
    /// stream; a missing object is `NotFound`.
    async fn get_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: Option<u64>,
    ) -> StoreResult<ObjectReader>;

    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> StoreResult<()>;

    async fn delete_object(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Lists keys under `prefix`. With a delimiter, keys that contain the
    /// delimiter after the prefix collapse into one `CommonPrefix` each.
    /// No ordering is promised.
    async fn list_objects(
        &self,
        prefix: &ObjectKey,
        delimiter: Option<char>,
    ) -> StoreResult<Vec<ListEntry>>;

    async fn copy_object(&self, src: &ObjectKey, dst: &ObjectKey) -> StoreResult<()>;
}

/// Shared handle over a boxed backend.
#[derive(Clone)]
pub struct ObjectClient {
    backend: Arc<dyn ObjectBackend>,
}

impl ObjectClient {
    pub fn new<B: ObjectBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub async fn head(&self, key: &ObjectKey) -> StoreResult<ObjectAttrs> {
        debug!(container = key.container(), key = key.path(), "head object");
        self.backend.head_object(key).await
    }

    pub async fn get_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: Option<u64>,
    ) -> StoreResult<ObjectReader> {
        debug!(
            container = key.container(),
            key = key.path(),
            offset,
            ?length,
            "ranged get"
        );
        self.backend.get_range(key, offset, length).await
    }

    pub async fn put_object(&self, key: &ObjectKey, data: Bytes) -> StoreResult<()> {
        debug!(
            container = key.container(),
            key = key.path(),
            size = data.len(),
            "put object"
        );
        self.backend.put_object(key, data).await
    }

    pub fn new_writer(&self, key: &ObjectKey) -> ObjectWriter {
        ObjectWriter {
            client: self.clone(),
            key: key.clone(),
            buf: BytesMut::new(),
        }
    }

    pub async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        debug!(container = key.container(), key = key.path(), "delete object");
        self.backend.delete_object(key).await
    }

    pub async fn list(
        &self,
        prefix: &ObjectKey,
        delimiter: Option<char>,
    ) -> StoreResult<Vec<ListEntry>> {
        debug!(
            container = prefix.container(),
            prefix = prefix.path(),
            ?delimiter,
            "list objects"
        );
        self.backend.list_objects(prefix, delimiter).await
    }

    pub async fn copy(&self, src: &ObjectKey, dst: &ObjectKey) -> StoreResult<()> {
        debug!(%src, %dst, "copy object");
        self.backend.copy_object(src, dst).await
    }
}

/// Client-side write buffer for one new object generation.
///
/// Nothing is visible in the store until `close()` succeeds; dropping the
/// writer discards the buffered bytes.
pub struct ObjectWriter {
    client: ObjectClient,
    key: ObjectKey,
    buf: BytesMut,
}

impl ObjectWriter {
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Commits the buffered bytes as the object's new content and returns
    /// the committed size.
    pub async fn close(self) -> StoreResult<u64> {
        let size = self.buf.len() as u64;
        self.client.put_object(&self.key, self.buf.freeze()).await?;
        Ok(size)
    }
}

impl AsyncWrite for ObjectWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.get_mut().buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Folds a flat key scan into prefix/delimiter listing results, for backends
/// that have no server-side listing.
pub(crate) struct ListingBuilder<'a> {
    prefix: &'a str,
    delimiter: Option<char>,
    seen_prefixes: HashSet<String>,
    entries: Vec<ListEntry>,
}

impl<'a> ListingBuilder<'a> {
    pub(crate) fn new(prefix: &'a ObjectKey, delimiter: Option<char>) -> Self {
        Self {
            prefix: prefix.path(),
            delimiter,
            seen_prefixes: HashSet::new(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, key: &str, attrs: ObjectAttrs) {
        let Some(rest) = key.strip_prefix(self.prefix) else {
            return;
        };
        if let Some(idx) = self.delimiter.and_then(|d| rest.find(d)) {
            let d_len = self.delimiter.map(char::len_utf8).unwrap_or(1);
            let common = &key[..self.prefix.len() + idx + d_len];
            if self.seen_prefixes.insert(common.to_string()) {
                self.entries.push(ListEntry::CommonPrefix(common.to_string()));
            }
            return;
        }
        self.entries.push(ListEntry::Object {
            key: key.to_string(),
            attrs,
        });
    }

    pub(crate) fn finish(self) -> Vec<ListEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn attrs(size: u64) -> ObjectAttrs {
        ObjectAttrs {
            size,
            modified: UNIX_EPOCH,
        }
    }

    #[test]
    fn test_listing_builder_groups_by_delimiter() {
        let prefix = ObjectKey::new("bkt", "a/");
        let mut b = ListingBuilder::new(&prefix, Some('/'));
        b.push("a/x.txt", attrs(3));
        b.push("a/sub/one", attrs(1));
        b.push("a/sub/two", attrs(2));
        b.push("a/", attrs(0));
        b.push("other/file", attrs(9));
        let mut out = b.finish();
        out.sort_by(|l, r| format!("{l:?}").cmp(&format!("{r:?}")));

        assert_eq!(out.len(), 3);
        assert!(out.contains(&ListEntry::CommonPrefix("a/sub/".into())));
        assert!(out.contains(&ListEntry::Object {
            key: "a/x.txt".into(),
            attrs: attrs(3)
        }));
        assert!(out.contains(&ListEntry::Object {
            key: "a/".into(),
            attrs: attrs(0)
        }));
    }

    #[test]
    fn test_listing_builder_without_delimiter_is_flat() {
        let prefix = ObjectKey::new("bkt", "");
        let mut b = ListingBuilder::new(&prefix, None);
        b.push("a/b/c", attrs(1));
        b.push("d", attrs(1));
        assert_eq!(b.finish().len(), 2);
    }

    #[tokio::test]
    async fn test_writer_commits_only_on_close() {
        use crate::cadapter::memory::InMemoryBackend;
        use tokio::io::AsyncWriteExt;

        let client = ObjectClient::new(InMemoryBackend::new());
        let key = ObjectKey::new("bkt", "w.bin");
        let mut w = client.new_writer(&key);
        w.write(b"abc");
        w.write_all(b"def").await.unwrap();
        assert!(client.head(&key).await.unwrap_err().is_not_found());

        assert_eq!(w.close().await.unwrap(), 6);
        assert_eq!(client.head(&key).await.unwrap().size, 6);
    }
}
