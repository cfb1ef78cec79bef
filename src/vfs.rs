use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alias;
use crate::cas::{BlobInfo, ContentStore, FsContentStore};
use crate::config::{Config, Limits};
use crate::error::{Error, Result};
use crate::metastore::{
    FileRecord, FjallStore, MetaStore, Metadata, RecordField, RecordPatch, FOLDER_MIME_TYPE,
};
use crate::metrics::SharedMetrics;
use crate::tree::{self, CopyPair, SearchQuery, SortSpec};

/// Ids handed to a single `ContentStore::destroy` call.
const DESTROY_BATCH: usize = 64;

/// Caller flags shared by the mutating and searching entry points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Turns a name clash on `create` or a missing target on `update` into
    /// an in-place write instead of an error.
    pub force: bool,
    /// Limits `search` to the record and its direct children.
    pub shallow: bool,
}

impl Flags {
    pub fn force() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn shallow() -> Self {
        Self {
            shallow: true,
            ..Default::default()
        }
    }
}

/// Where a forced `update` creates its target when it does not exist yet.
#[derive(Debug, Clone)]
pub struct Placement {
    pub parent_id: String,
    pub name: String,
    pub mime_type: String,
}

/// Result of `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadResult {
    /// Ids of the children of a folder.
    Children(Vec<String>),
    /// Where the content of a file can be fetched.
    Url(String),
}

/// The filesystem facade.
///
/// Every entry point validates its arguments once, then sequences calls to
/// the metadata store, the content store and the tree engine. Backend
/// failures leave here as `Error::DefaultServerError`.
#[derive(Debug, Clone)]
pub struct TreeFs {
    meta: Metadata,
    content: Arc<dyn ContentStore>,
    metrics: SharedMetrics,
    limits: Limits,
}

impl TreeFs {
    pub fn new(
        meta_store: Arc<dyn MetaStore>,
        content: Arc<dyn ContentStore>,
        metrics: SharedMetrics,
        limits: Limits,
    ) -> Self {
        Self {
            meta: Metadata::new(meta_store),
            content,
            metrics,
            limits,
        }
    }

    /// Opens the fjall metadata store and the on-disk content store
    /// described by `config`.
    pub fn open(config: &Config, metrics: SharedMetrics) -> Result<Self> {
        config.validate()?;
        let meta = FjallStore::open(&config.meta)?;
        let content = FsContentStore::new(&config.content, metrics.clone())?;
        Ok(Self::new(
            Arc::new(meta),
            Arc::new(content),
            metrics,
            config.limits.clone(),
        ))
    }

    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    fn finish<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            let e = e.sanitize();
            self.metrics.operation_failed(op, e.code());
            debug!(op, error = %e, "operation failed");
            e
        })
    }

    /// Resolves `path` below `root_id` to a record id.
    pub async fn alias(&self, path: &str, root_id: &str) -> Result<String> {
        self.metrics.operation("alias");
        let result = validate_id(root_id).and_then(|_| alias::resolve(&self.meta, path, root_id));
        self.finish("alias", result)
    }

    /// Child ids for a folder, a content URL for a file.
    pub async fn read(&self, id: &str) -> Result<ReadResult> {
        self.metrics.operation("read");
        let result = self.read_inner(id);
        self.finish("read", result)
    }

    fn read_inner(&self, id: &str) -> Result<ReadResult> {
        validate_id(id)?;
        let record = self.meta.find(id)?;
        if record.is_folder() {
            let children = self
                .meta
                .find_children(id)?
                .into_iter()
                .map(|child| child.id().to_string())
                .collect();
            Ok(ReadResult::Children(children))
        } else {
            Ok(ReadResult::Url(self.content.get_url(id)))
        }
    }

    /// The whole content of a file.
    pub async fn fetch(&self, id: &str) -> Result<(Bytes, BlobInfo)> {
        self.metrics.operation("fetch");
        let result = self.fetch_inner(id).await;
        self.finish("fetch", result)
    }

    async fn fetch_inner(&self, id: &str) -> Result<(Bytes, BlobInfo)> {
        validate_id(id)?;
        let record = self.meta.find(id)?;
        if record.is_folder() {
            return Err(Error::InvalidResourceType(format!("{id} is a folder")));
        }
        self.content.get(id).await
    }

    /// Creates a file (or, with the `folder` MIME type, a folder) called
    /// `name` in `parent_id`.
    ///
    /// If the name is taken the call fails with `ResourceExists`, unless
    /// `flags.force` is set, in which case the existing record is updated in
    /// place.
    pub async fn create(
        &self,
        parent_id: &str,
        mime_type: &str,
        name: &str,
        content: Bytes,
        flags: Flags,
    ) -> Result<FileRecord> {
        self.metrics.operation("create");
        let result = self.create_inner(parent_id, mime_type, name, content, flags).await;
        self.finish("create", result)
    }

    async fn create_inner(
        &self,
        parent_id: &str,
        mime_type: &str,
        name: &str,
        content: Bytes,
        flags: Flags,
    ) -> Result<FileRecord> {
        validate_id(parent_id)?;
        validate_mime_type(mime_type)?;
        validate_name(name)?;
        self.check_size(&content)?;

        if let Some(existing) = self.meta.lookup_child(parent_id, name)? {
            if !flags.force {
                return Err(Error::ResourceExists(format!(
                    "'{name}' already exists in {parent_id}"
                )));
            }
            return self.overwrite(existing, mime_type, content).await;
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.insert_new(parent_id, &id, mime_type, name, content).await
    }

    /// Writes content (files only) and then the record, removing the blob
    /// again if the record cannot be inserted.
    async fn insert_new(
        &self,
        parent_id: &str,
        id: &str,
        mime_type: &str,
        name: &str,
        content: Bytes,
    ) -> Result<FileRecord> {
        let parent = self.meta.find(parent_id)?;
        if !parent.is_folder() {
            return Err(Error::InvalidResourceType(format!(
                "parent {parent_id} is not a folder"
            )));
        }

        if mime_type == FOLDER_MIME_TYPE {
            let record = self.meta.create_unique(parent_id, id, mime_type, name, 0)?;
            self.metrics.records_created(1);
            info!(id = %id, parent = %parent_id, name = %name, "folder created");
            return Ok(record);
        }

        let size = self.content.write(id, mime_type, content).await?;
        match self.meta.create_unique(parent_id, id, mime_type, name, size) {
            Ok(record) => {
                self.metrics.records_created(1);
                info!(id = %id, parent = %parent_id, name = %name, size, "file created");
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.content.destroy(&[id.to_string()]).await {
                    warn!(id = %id, error = %cleanup, "failed to remove orphaned blob");
                }
                Err(e)
            }
        }
    }

    /// Forced create over an existing record.
    async fn overwrite(
        &self,
        existing: FileRecord,
        mime_type: &str,
        content: Bytes,
    ) -> Result<FileRecord> {
        let wants_folder = mime_type == FOLDER_MIME_TYPE;
        if existing.is_folder() != wants_folder {
            return Err(Error::InvalidResourceType(format!(
                "'{}' exists with type {}",
                existing.name(),
                existing.mime_type()
            )));
        }
        if existing.is_folder() {
            return self.meta.update(existing.id(), RecordPatch::touch());
        }
        // mimeType is fixed at creation
        if existing.mime_type() != mime_type {
            return Err(Error::InvalidResourceType(format!(
                "'{}' exists with type {}, not {}",
                existing.name(),
                existing.mime_type(),
                mime_type
            )));
        }
        self.write_content(&existing, content).await
    }

    /// Replaces the content of a file record, keeping its MIME type.
    async fn write_content(&self, record: &FileRecord, content: Bytes) -> Result<FileRecord> {
        let size = self
            .content
            .write(record.id(), record.mime_type(), content)
            .await?;
        let updated = self.meta.update(record.id(), RecordPatch::size(size))?;
        info!(id = %record.id(), size, "content replaced");
        Ok(updated)
    }

    /// Replaces the content of the file `id`.
    ///
    /// A missing target is `ResourceNotFound`, unless `flags.force` is set:
    /// then the file is created with this id at `fallback`.
    pub async fn update(
        &self,
        id: &str,
        content: Bytes,
        flags: Flags,
        fallback: Option<Placement>,
    ) -> Result<FileRecord> {
        self.metrics.operation("update");
        let result = self.update_inner(id, content, flags, fallback).await;
        self.finish("update", result)
    }

    async fn update_inner(
        &self,
        id: &str,
        content: Bytes,
        flags: Flags,
        fallback: Option<Placement>,
    ) -> Result<FileRecord> {
        validate_id(id)?;
        self.check_size(&content)?;

        match self.meta.store().get(id)? {
            Some(record) if record.is_folder() => Err(Error::InvalidResourceType(format!(
                "{id} is a folder and has no content"
            ))),
            Some(record) => self.write_content(&record, content).await,
            None if !flags.force => Err(Error::ResourceNotFound(format!("no resource with id {id}"))),
            None => {
                let placement = fallback.ok_or_else(|| {
                    Error::InvalidParameters(format!(
                        "{id} does not exist and no placement was given to create it"
                    ))
                })?;
                validate_id(&placement.parent_id)?;
                validate_name(&placement.name)?;
                validate_mime_type(&placement.mime_type)?;
                if placement.mime_type == FOLDER_MIME_TYPE {
                    return Err(Error::InvalidResourceType(
                        "update cannot create folders".to_string(),
                    ));
                }
                self.insert_new(
                    &placement.parent_id,
                    id,
                    &placement.mime_type,
                    &placement.name,
                    content,
                )
                .await
            }
        }
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<FileRecord> {
        self.metrics.operation("rename");
        let result = validate_id(id)
            .and_then(|_| validate_name(name))
            .and_then(|_| self.meta.update(id, RecordPatch::name(name)));
        self.finish("rename", result)
    }

    /// Re-parents `id` under the folder `destination_id`.
    pub async fn move_to(&self, id: &str, destination_id: &str) -> Result<FileRecord> {
        self.metrics.operation("move");
        let result = self.move_inner(id, destination_id);
        self.finish("move", result)
    }

    fn move_inner(&self, id: &str, destination_id: &str) -> Result<FileRecord> {
        validate_id(id)?;
        validate_id(destination_id)?;
        let destination = self.meta.find(destination_id)?;
        if !destination.is_folder() {
            return Err(Error::InvalidResourceType(format!(
                "move destination {destination_id} is not a folder"
            )));
        }
        self.meta.find(id)?;
        if tree::is_within(&self.meta, destination_id, id)? {
            return Err(Error::InvalidAction(format!(
                "cannot move {id} into itself or one of its descendants"
            )));
        }
        let record = self
            .meta
            .update(id, RecordPatch::parents(vec![destination_id.to_string()]))?;
        info!(id = %id, destination = %destination_id, "resource moved");
        Ok(record)
    }

    /// Removes `id` and, for folders, everything below it. Returns the ids
    /// of all removed records.
    pub async fn destroy(&self, id: &str) -> Result<Vec<String>> {
        self.metrics.operation("destroy");
        let result = self.destroy_inner(id).await;
        self.finish("destroy", result)
    }

    async fn destroy_inner(&self, id: &str) -> Result<Vec<String>> {
        validate_id(id)?;
        let record = self
            .meta
            .store()
            .get(id)?
            .ok_or_else(|| Error::ResourceNotFound(format!("no resource with id {id}")))?;

        if !record.is_folder() {
            self.content.destroy(&[id.to_string()]).await?;
            let removed = self.meta.destroy(id)?;
            self.metrics.records_destroyed(removed.len() as u64);
            info!(id = %id, "file destroyed");
            return Ok(removed);
        }

        // metadata first: a crash in between leaves orphaned blobs, never
        // records pointing at missing content
        let removed = tree::destroy_subtree(&self.meta, id)?;
        let blobs: Vec<String> = removed
            .iter()
            .filter(|record| !record.is_folder())
            .map(|record| record.id().to_string())
            .collect();
        let batches: Vec<Vec<String>> = blobs
            .chunks(DESTROY_BATCH)
            .map(<[String]>::to_vec)
            .collect();
        stream::iter(batches)
            .map(|batch| async move { self.content.destroy(&batch).await })
            .buffer_unordered(self.limits.max_concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;

        self.metrics.records_destroyed(removed.len() as u64);
        info!(id = %id, records = removed.len(), blobs = blobs.len(), "folder destroyed");
        Ok(removed.into_iter().map(|r| r.id().to_string()).collect())
    }

    pub async fn search(
        &self,
        id: &str,
        query: &SearchQuery,
        sort: Option<SortSpec>,
        flags: Flags,
    ) -> Result<Vec<FileRecord>> {
        self.metrics.operation("search");
        let result = validate_id(id)
            .and_then(|_| tree::search_subtree(&self.meta, id, query, sort, flags.shallow));
        self.finish("search", result)
    }

    /// The record as a JSON object, restricted to `fields` when given.
    pub async fn inspect(
        &self,
        id: &str,
        fields: Option<&[RecordField]>,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.metrics.operation("inspect");
        let result = validate_id(id)
            .and_then(|_| self.meta.find(id))
            .and_then(|record| record.project(fields));
        self.finish("inspect", result)
    }

    /// Copies `id` (recursively for folders) into the folder `destination_id`.
    pub async fn copy(&self, id: &str, destination_id: &str) -> Result<Vec<CopyPair>> {
        self.metrics.operation("copy");
        let result = self.copy_inner(id, destination_id).await;
        if let Ok(pairs) = &result {
            self.metrics.records_created(pairs.len() as u64);
            info!(id = %id, destination = %destination_id, copied = pairs.len(), "resource copied");
        }
        self.finish("copy", result)
    }

    async fn copy_inner(&self, id: &str, destination_id: &str) -> Result<Vec<CopyPair>> {
        validate_id(id)?;
        validate_id(destination_id)?;
        tree::copy_subtree(
            &self.meta,
            self.content.as_ref(),
            id,
            destination_id,
            self.limits.max_concurrency,
        )
        .await
    }

    pub async fn download(&self, _id: &str) -> Result<Bytes> {
        self.metrics.operation("download");
        self.finish("download", Err(Error::NotImplemented("download")))
    }

    pub async fn bulk(&self) -> Result<()> {
        self.metrics.operation("bulk");
        self.finish("bulk", Err(Error::NotImplemented("bulk")))
    }

    /// Creates a folder without a parent.
    pub async fn create_root(&self, name: &str) -> Result<FileRecord> {
        self.metrics.operation("create_root");
        let result = validate_name(name).and_then(|_| {
            let id = uuid::Uuid::new_v4().to_string();
            self.meta.create_root(&id, name)
        });
        if let Ok(record) = &result {
            self.metrics.records_created(1);
            info!(id = %record.id(), name = %name, "root created");
        }
        self.finish("create_root", result)
    }

    pub async fn roots(&self) -> Result<Vec<FileRecord>> {
        self.metrics.operation("roots");
        let result = self.meta.roots();
        self.finish("roots", result)
    }

    fn check_size(&self, content: &Bytes) -> Result<()> {
        if content.len() > self.limits.max_upload_size {
            return Err(Error::RequestDataTooLarge {
                size: content.len(),
                limit: self.limits.max_upload_size,
            });
        }
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidParameters(format!("'{id}' is not a valid id")));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(Error::InvalidParameters(format!("'{name}' is not a valid name")));
    }
    Ok(())
}

fn validate_mime_type(mime_type: &str) -> Result<()> {
    if mime_type.trim().is_empty() || mime_type.contains('\0') {
        return Err(Error::InvalidParameters("a MIME type is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(validate_id("B1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_name("b.txt").is_ok());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_mime_type(" ").is_err());
    }

    #[test]
    fn test_flags() {
        assert!(Flags::force().force);
        assert!(!Flags::force().shallow);
        assert!(Flags::shallow().shallow);
        assert_eq!(Flags::default(), Flags { force: false, shallow: false });
    }
}
