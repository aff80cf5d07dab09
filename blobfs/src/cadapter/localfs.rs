//! Local directory backend that mimics an object store (implements ObjectBackend).
//!
//! Every container is a directory under `root` and every object is one flat
//! file inside it. `/` and `%` in keys are escaped in file names, so nested
//! keys never turn into real directories and the namespace stays flat. A
//! leading `.` is escaped too: file names starting with `.` are reserved for
//! staging files, and `.`/`..` never reach the filesystem as names.

use crate::cadapter::client::{
    ListEntry, ListingBuilder, ObjectAttrs, ObjectBackend, ObjectReader, StoreError, StoreResult,
};
use crate::path::ObjectKey;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn path_for(&self, key: &ObjectKey) -> PathBuf {
        self.container_dir(key.container())
            .join(encode_key(key.path()))
    }

    fn map_err(key: &ObjectKey, err: std::io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::NotFound(key.clone())
        } else {
            StoreError::Io(err)
        }
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, c) in key.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '.' if i == 0 => out.push_str("%2E"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escaped = rest.get(pos + 1..pos + 3);
        match escaped {
            Some("25") => out.push('%'),
            Some("2F") => out.push('/'),
            Some("2E") => out.push('.'),
            _ => {
                out.push('%');
                rest = &rest[pos + 1..];
                continue;
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn head_object(&self, key: &ObjectKey) -> StoreResult<ObjectAttrs> {
        let meta = fs::metadata(self.path_for(key))
            .await
            .map_err(|e| Self::map_err(key, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(ObjectAttrs {
            size: meta.len(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
        })
    }

    async fn get_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: Option<u64>,
    ) -> StoreResult<ObjectReader> {
        let mut f = fs::File::open(self.path_for(key))
            .await
            .map_err(|e| Self::map_err(key, e))?;
        f.seek(SeekFrom::Start(offset)).await?;
        match length {
            Some(len) => Ok(Box::pin(f.take(len))),
            None => Ok(Box::pin(f)),
        }
    }

    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> StoreResult<()> {
        let dir = self.container_dir(key.container());
        fs::create_dir_all(&dir).await?;
        // write-then-rename so readers never observe a half-written generation
        let path = self.path_for(key);
        let tmp = dir.join(format!(".{}.tmp", encode_key(key.path())));
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(&data).await?;
        f.flush().await?;
        drop(f);
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> StoreResult<()> {
        fs::remove_file(self.path_for(key))
            .await
            .map_err(|e| Self::map_err(key, e))
    }

    async fn list_objects(
        &self,
        prefix: &ObjectKey,
        delimiter: Option<char>,
    ) -> StoreResult<Vec<ListEntry>> {
        let mut listing = ListingBuilder::new(prefix, delimiter);
        let mut dir = match fs::read_dir(self.container_dir(prefix.container())).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // staging files from put_object
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            listing.push(
                &decode_key(&name),
                ObjectAttrs {
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(UNIX_EPOCH),
                },
            );
        }
        Ok(listing.finish())
    }

    async fn copy_object(&self, src: &ObjectKey, dst: &ObjectKey) -> StoreResult<()> {
        fs::create_dir_all(self.container_dir(dst.container())).await?;
        fs::copy(self.path_for(src), self.path_for(dst))
            .await
            .map_err(|e| Self::map_err(src, e))?;
        Ok(())
    }
}
