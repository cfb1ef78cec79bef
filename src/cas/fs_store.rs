use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use tracing::{debug, trace};

use super::{BlobInfo, ContentStore};
use crate::config::ContentConfig;
use crate::error::{Error, Result};
use crate::metrics::SharedMetrics;

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Content store on the local disk, laid out like an S3 bucket.
///
/// A blob for `id` lives at `fs_root/bucket/xx/id`, where `xx` is the first
/// byte of `md5(id)` in hex, next to a JSON sidecar holding its [`BlobInfo`].
#[derive(Debug)]
pub struct FsContentStore {
    root: PathBuf,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    metrics: SharedMetrics,
}

impl FsContentStore {
    pub fn new(config: &ContentConfig, metrics: SharedMetrics) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root: config.fs_root.join(&config.bucket),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            metrics,
        })
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id == "." || id == ".." {
            return Err(Error::InvalidParameters(format!("'{id}' is not a valid blob id")));
        }
        let digest = Md5::digest(id.as_bytes());
        let shard = faster_hex::hex_string(&digest[..1]);
        Ok(self.root.join(shard).join(id))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            async_fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Writes via a temporary file so readers never see half a blob.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let tmp = PathBuf::from(tmp);
        async_fs::write(&tmp, data).await?;
        async_fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_info(path: &Path) -> Result<BlobInfo> {
        let raw = async_fs::read(Self::sidecar_path(path)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn write(&self, id: &str, mime_type: &str, content: Bytes) -> Result<u64> {
        let path = self.blob_path(id)?;
        Self::ensure_parent(&path).await?;

        let info = BlobInfo {
            mime_type: mime_type.to_string(),
            size: content.len() as u64,
            etag: faster_hex::hex_string(&Md5::digest(&content)),
        };
        Self::write_atomic(&path, &content).await?;
        Self::write_atomic(&Self::sidecar_path(&path), &serde_json::to_vec(&info)?).await?;

        self.metrics.bytes_received(content.len());
        debug!(id = %id, size = info.size, etag = %info.etag, "blob written");
        Ok(info.size)
    }

    async fn copy(&self, from_id: &str, to_id: &str) -> Result<()> {
        let from = self.blob_path(from_id)?;
        let to = self.blob_path(to_id)?;
        Self::ensure_parent(&to).await?;

        match async_fs::copy(&from, &to).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::InvalidResource(format!("no content for {from_id}")));
            }
            Err(e) => return Err(e.into()),
        }
        async_fs::copy(Self::sidecar_path(&from), Self::sidecar_path(&to)).await?;

        debug!(from = %from_id, to = %to_id, "blob copied");
        Ok(())
    }

    async fn destroy(&self, ids: &[String]) -> Result<()> {
        let mut dropped = 0;
        for id in ids {
            let path = self.blob_path(id)?;
            match async_fs::remove_file(&path).await {
                Ok(()) => dropped += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    trace!(id = %id, "no blob to remove");
                }
                Err(e) => return Err(e.into()),
            }
            match async_fs::remove_file(Self::sidecar_path(&path)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.metrics.blobs_dropped(dropped);
        debug!(requested = ids.len(), dropped, "blobs destroyed");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<(Bytes, BlobInfo)> {
        let path = self.blob_path(id)?;
        let data = match async_fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::InvalidResource(format!("no content for {id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let info = Self::read_info(&path).await?;
        self.metrics.bytes_sent(data.len());
        Ok((Bytes::from(data), info))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn get_url(&self, id: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, self.bucket, id),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, id
            ),
        }
    }
}
