use std::fmt::Debug;
use std::str::FromStr;

use serde::Deserialize;

use super::FileRecord;
use crate::error::Result;

/// MetaStore is the interface that defines the methods to interact with the metadata store.
///
/// It stores file records keyed by id and keeps a `(parent, name)` index over
/// them. Implementations must keep the index and the records consistent:
/// every write below updates both atomically.
pub trait MetaStore: Send + Sync + Debug + 'static {
    /// Opens the backend. Calling it on an open store is a no-op.
    fn connect(&self) -> Result<()>;

    /// Flushes and releases the backend. Later calls fail until `connect`.
    fn close(&self) -> Result<()>;

    /// Gets the record with the given id.
    fn get(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Inserts a record, overwriting any record with the same id.
    fn insert(&self, record: &FileRecord) -> Result<()>;

    /// Inserts a record unless one of its parents already has a child with
    /// the same name. The check and the insert happen under one writer lock.
    ///
    /// Returns `Error::ResourceExists` on a name clash.
    fn insert_unique(&self, record: &FileRecord) -> Result<()>;

    /// Replaces the stored record with the same id, re-indexing it.
    ///
    /// Returns the previous record, or `None` (and writes nothing) if the
    /// record no longer exists.
    fn replace(&self, record: &FileRecord) -> Result<Option<FileRecord>>;

    /// Like `replace`, but fails with `Error::ResourceExists` if one of the
    /// record's parents has another child with the same name. The check and
    /// the write happen under one writer lock.
    fn replace_unique(&self, record: &FileRecord) -> Result<Option<FileRecord>>;

    /// Removes a record and its index entries, returning it if it existed.
    fn remove(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Gets all records listing `parent_id` among their parents.
    fn children(&self, parent_id: &str) -> Result<Vec<FileRecord>>;

    /// Gets the children of `parent_id` named `name`.
    ///
    /// More than one entry means the sibling-name invariant was broken.
    fn children_named(&self, parent_id: &str, name: &str) -> Result<Vec<FileRecord>>;

    /// Gets all records without parents.
    fn roots(&self) -> Result<Vec<FileRecord>> {
        self.children("")
    }

    /// Returns the number of stored records.
    fn num_records(&self) -> Result<usize>;

    /// Returns the disk space used by the metadata store.
    fn disk_space(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Buffer,
    Fsync,
    Fdatasync,
}

impl Default for Durability {
    fn default() -> Self {
        Durability::Fdatasync
    }
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffer" => Ok(Durability::Buffer),
            "fsync" => Ok(Durability::Fsync),
            "fdatasync" => Ok(Durability::Fdatasync),
            _ => Err(format!("Unknown durability option: {}", s)),
        }
    }
}
