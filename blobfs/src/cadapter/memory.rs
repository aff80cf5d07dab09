//! In-memory object store used for tests and local experiments.
//!
//! Objects live in a `HashMap`, so listings come back in hash order just like
//! a real store that does not promise name ordering.

use crate::cadapter::client::{
    ListEntry, ListingBuilder, ObjectAttrs, ObjectBackend, ObjectReader, StoreError, StoreResult,
};
use crate::path::ObjectKey;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::SystemTime;
use tokio::sync::RwLock;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    modified: SystemTime,
}

impl StoredObject {
    fn attrs(&self) -> ObjectAttrs {
        ObjectAttrs {
            size: self.data.len() as u64,
            modified: self.modified,
        }
    }
}

#[derive(Default)]
pub struct InMemoryBackend {
    objects: RwLock<HashMap<ObjectKey, StoredObject>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn head_object(&self, key: &ObjectKey) -> StoreResult<ObjectAttrs> {
        self.objects
            .read()
            .await
            .get(key)
            .map(StoredObject::attrs)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn get_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: Option<u64>,
    ) -> StoreResult<ObjectReader> {
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let total = data.len() as u64;
        let start = offset.min(total);
        let end = match length {
            Some(len) => start.saturating_add(len).min(total),
            None => total,
        };
        let range = data.slice(start as usize..end as usize);
        Ok(Box::pin(Cursor::new(range)))
    }

    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> StoreResult<()> {
        self.objects.write().await.insert(
            key.clone(),
            StoredObject {
                data,
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> StoreResult<()> {
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn list_objects(
        &self,
        prefix: &ObjectKey,
        delimiter: Option<char>,
    ) -> StoreResult<Vec<ListEntry>> {
        let objects = self.objects.read().await;
        let mut listing = ListingBuilder::new(prefix, delimiter);
        for (key, obj) in objects.iter() {
            if key.container() == prefix.container() {
                listing.push(key.path(), obj.attrs());
            }
        }
        Ok(listing.finish())
    }

    async fn copy_object(&self, src: &ObjectKey, dst: &ObjectKey) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let data = objects
            .get(src)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(src.clone()))?;
        objects.insert(
            dst.clone(),
            StoredObject {
                data,
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}
