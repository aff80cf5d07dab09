//! S3 adapter: aws-sdk-s3 backed ObjectBackend.
//!
//! Containers map to buckets, so one backend serves every bucket the
//! credentials can reach. Small objects go through a single `PutObject`
//! with a Content-MD5 checksum; anything above `part_size` is uploaded with
//! a multipart upload whose parts run concurrently.

use crate::cadapter::client::{
    ListEntry, ObjectAttrs, ObjectBackend, ObjectReader, StoreError, StoreResult,
};
use crate::path::ObjectKey;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// S3 backend options.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint, e.g. a MinIO or RustFS gateway.
    pub endpoint: Option<String>,
    /// Use `http://host/bucket/key` addressing instead of virtual hosts.
    pub force_path_style: bool,
    /// Multipart part size in bytes; 8-64MiB works well.
    pub part_size: usize,
    /// Parts uploaded concurrently.
    pub max_concurrency: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            force_path_style: false,
            part_size: 8 * 1024 * 1024, // 8MB
            max_concurrency: 8,
        }
    }
}

pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3_conf = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();
        Self {
            client: Client::from_conf(s3_conf),
            config,
        }
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }

    fn to_system_time(t: Option<&aws_sdk_s3::primitives::DateTime>) -> SystemTime {
        t.and_then(|t| SystemTime::try_from(*t).ok())
            .unwrap_or(UNIX_EPOCH)
    }

    async fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
        semaphore: Arc<Semaphore>,
    ) -> StoreResult<CompletedPart> {
        let _permit = semaphore.acquire().await.map_err(StoreError::backend)?;
        let resp = self
            .client
            .upload_part()
            .bucket(key.container())
            .key(key.path())
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(Self::md5_base64(&data))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(StoreError::backend)?;
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(resp.e_tag().map(str::to_string))
            .build())
    }

    async fn put_multipart(&self, key: &ObjectKey, data: Bytes) -> StoreResult<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(key.container())
            .key(key.path())
            .send()
            .await
            .map_err(StoreError::backend)?;
        let upload_id = create.upload_id().unwrap_or_default().to_string();
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let part_size = self.config.part_size.max(1);
        let mut parts = Vec::new();
        let mut idx = 0usize;
        let mut part_number = 1i32;
        while idx < data.len() {
            let end = (idx + part_size).min(data.len());
            parts.push(self.upload_part(
                key,
                &upload_id,
                part_number,
                data.slice(idx..end),
                sem.clone(),
            ));
            idx = end;
            part_number += 1;
        }

        let completed_parts = match futures::future::try_join_all(parts).await {
            Ok(v) => v,
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(key.container())
                    .key(key.path())
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(%key, error = %abort_err, "abort multipart upload failed");
                }
                return Err(e);
            }
        };

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(key.container())
            .key(key.path())
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn head_object(&self, key: &ObjectKey) -> StoreResult<ObjectAttrs> {
        let resp = self
            .client
            .head_object()
            .bucket(key.container())
            .key(key.path())
            .send()
            .await;
        match resp {
            Ok(o) => Ok(ObjectAttrs {
                size: o.content_length().unwrap_or(0).max(0) as u64,
                modified: Self::to_system_time(o.last_modified()),
            }),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    async fn get_range(
        &self,
        key: &ObjectKey,
        offset: u64,
        length: Option<u64>,
    ) -> StoreResult<ObjectReader> {
        let range = match length {
            // S3 has no empty range; still surface a missing object
            Some(0) => {
                self.head_object(key).await?;
                return Ok(Box::pin(tokio::io::empty()));
            }
            Some(len) => Some(format!("bytes={}-{}", offset, offset + len - 1)),
            None if offset > 0 => Some(format!("bytes={offset}-")),
            None => None,
        };
        let resp = self
            .client
            .get_object()
            .bucket(key.container())
            .key(key.path())
            .set_range(range)
            .send()
            .await;
        match resp {
            Ok(o) => Ok(Box::pin(o.body.into_async_read())),
            Err(e) => match e.as_service_error() {
                Some(se) if se.is_no_such_key() => Err(StoreError::NotFound(key.clone())),
                // a range starting at or past the end of the object
                Some(se) if se.code() == Some("InvalidRange") => {
                    debug!(%key, offset, "range past end of object");
                    Ok(Box::pin(tokio::io::empty()))
                }
                _ => Err(StoreError::backend(e)),
            },
        }
    }

    async fn put_object(&self, key: &ObjectKey, data: Bytes) -> StoreResult<()> {
        // small objects in one PUT, large ones as multipart
        if data.len() > self.config.part_size {
            return self.put_multipart(key, data).await;
        }
        self.client
            .put_object()
            .bucket(key.container())
            .key(key.path())
            .content_md5(Self::md5_base64(&data))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> StoreResult<()> {
        // S3 reports success for missing keys as well.
        self.client
            .delete_object()
            .bucket(key.container())
            .key(key.path())
            .send()
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &ObjectKey,
        delimiter: Option<char>,
    ) -> StoreResult<Vec<ListEntry>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(prefix.container())
                .prefix(prefix.path())
                .set_delimiter(delimiter.map(String::from))
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(StoreError::backend)?;

            for p in resp.common_prefixes() {
                if let Some(p) = p.prefix() {
                    out.push(ListEntry::CommonPrefix(p.to_string()));
                }
            }
            for o in resp.contents() {
                if let Some(k) = o.key() {
                    out.push(ListEntry::Object {
                        key: k.to_string(),
                        attrs: ObjectAttrs {
                            size: o.size().unwrap_or(0).max(0) as u64,
                            modified: Self::to_system_time(o.last_modified()),
                        },
                    });
                }
            }

            match resp.next_continuation_token() {
                Some(t) if resp.is_truncated().unwrap_or(false) => token = Some(t.to_string()),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn copy_object(&self, src: &ObjectKey, dst: &ObjectKey) -> StoreResult<()> {
        let resp = self
            .client
            .copy_object()
            .copy_source(format!("{}/{}", src.container(), src.path()))
            .bucket(dst.container())
            .key(dst.path())
            .send()
            .await;
        match resp {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().and_then(|se| se.code()) == Some("NoSuchKey") => {
                Err(StoreError::NotFound(src.clone()))
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a reachable S3-compatible endpoint; enable with BLOBFS_S3_TEST=1.
    #[tokio::test]
    async fn test_s3_backend_put_head_get() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    {
        if std::env::var("BLOBFS_S3_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip s3 test: set BLOBFS_S3_TEST=1 to enable");
            return Ok(());
        }
        use tokio::io::AsyncReadExt;

        let backend = S3Backend::new(S3Config {
            endpoint: std::env::var("BLOBFS_S3_ENDPOINT").ok(),
            force_path_style: true,
            ..S3Config::default()
        })
        .await;
        let bucket = std::env::var("BLOBFS_S3_BUCKET").unwrap_or_else(|_| "main".into());
        let key = ObjectKey::new(bucket, "blobfs-test/hello");
        backend
            .put_object(&key, Bytes::from_static(b"hello"))
            .await?;
        assert_eq!(backend.head_object(&key).await?.size, 5);

        let mut out = Vec::new();
        backend
            .get_range(&key, 1, Some(3))
            .await?
            .read_to_end(&mut out)
            .await?;
        assert_eq!(out, b"ell");
        backend.delete_object(&key).await?;
        Ok(())
    }
}
