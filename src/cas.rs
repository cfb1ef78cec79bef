//! Content store: raw bytes addressed by record id.
//!
//! The store knows nothing about the tree. Folders never have an entry here.

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod fs_store;

pub use fs_store::FsContentStore;

/// What the content store remembers about a blob besides its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub mime_type: String,
    pub size: u64,
    /// Hex encoded MD5 of the content.
    pub etag: String,
}

#[async_trait]
pub trait ContentStore: Send + Sync + Debug + 'static {
    /// Stores `content` under `id`, overwriting any previous blob. Returns the size written.
    async fn write(&self, id: &str, mime_type: &str, content: Bytes) -> Result<u64>;

    /// Duplicates the blob at `from_id` to `to_id`.
    ///
    /// Fails with `Error::InvalidResource` if `from_id` has no blob.
    async fn copy(&self, from_id: &str, to_id: &str) -> Result<()>;

    /// Removes the blobs of all `ids`. Ids without a blob are skipped.
    async fn destroy(&self, ids: &[String]) -> Result<()>;

    /// Reads a whole blob back.
    async fn get(&self, id: &str) -> Result<(Bytes, BlobInfo)>;

    fn bucket(&self) -> &str;

    /// Public URL under which the blob of `id` is served.
    fn get_url(&self, id: &str) -> String;
}
