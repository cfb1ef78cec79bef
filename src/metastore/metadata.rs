use std::sync::Arc;

use tracing::debug;

use super::{FileRecord, MetaStore, RecordPatch};
use crate::error::{Error, Result};
use crate::tree;

/// Record-level view of the metadata tree.
///
/// Wraps a [`MetaStore`] and turns missing records into
/// `Error::InvalidResource`. Subtree-wide removal is delegated to the tree
/// engine.
#[derive(Debug, Clone)]
pub struct Metadata {
    store: Arc<dyn MetaStore>,
}

impl Metadata {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    pub fn find(&self, id: &str) -> Result<FileRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::InvalidResource(format!("no resource with id {id}")))
    }

    /// Children of `id`; empty when there are none, even if `id` itself is unknown.
    pub fn find_children(&self, id: &str) -> Result<Vec<FileRecord>> {
        self.store.children(id)
    }

    /// The unique child of `parent_id` called `name`.
    pub fn find_child(&self, parent_id: &str, name: &str) -> Result<FileRecord> {
        self.lookup_child(parent_id, name)?.ok_or_else(|| {
            Error::InvalidResource(format!("no resource named '{name}' in {parent_id}"))
        })
    }

    /// Like `find_child`, but a missing child is `None`.
    ///
    /// Several matches mean the sibling-name invariant is broken; that is
    /// reported as `InvalidResource` rather than picking one.
    pub fn lookup_child(&self, parent_id: &str, name: &str) -> Result<Option<FileRecord>> {
        let mut matches = self.store.children_named(parent_id, name)?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            n => Err(Error::InvalidResource(format!(
                "{n} resources named '{name}' in {parent_id}"
            ))),
        }
    }

    pub fn is_directory(&self, id: &str) -> Result<bool> {
        Ok(self.find(id)?.is_folder())
    }

    /// Applies `patch` to the record and stamps `lastModified`.
    ///
    /// A patch that renames or moves the record fails with `ResourceExists`
    /// when the target folder already has a child of that name.
    pub fn update(&self, id: &str, patch: RecordPatch) -> Result<FileRecord> {
        let mut record = self.find(id)?;
        let relocates = patch.name.is_some() || patch.parents.is_some();
        record.apply(patch);
        let previous = if relocates {
            self.store.replace_unique(&record)?
        } else {
            self.store.replace(&record)?
        };
        match previous {
            Some(_) => {
                debug!(id = %id, "record updated");
                Ok(record)
            }
            None => Err(Error::InvalidResource(format!("no resource with id {id}"))),
        }
    }

    pub fn create(
        &self,
        parent_id: &str,
        id: &str,
        mime_type: &str,
        name: &str,
        size: u64,
    ) -> Result<FileRecord> {
        let record = self.new_child(parent_id, id, mime_type, name, size)?;
        self.store.insert(&record)?;
        debug!(id = %id, parent = %parent_id, name = %name, "record created");
        Ok(record)
    }

    /// Same as `create`, but fails with `ResourceExists` if `parent_id`
    /// already has a child called `name`.
    pub fn create_unique(
        &self,
        parent_id: &str,
        id: &str,
        mime_type: &str,
        name: &str,
        size: u64,
    ) -> Result<FileRecord> {
        let record = self.new_child(parent_id, id, mime_type, name, size)?;
        self.store.insert_unique(&record)?;
        debug!(id = %id, parent = %parent_id, name = %name, "record created");
        Ok(record)
    }

    pub fn create_root(&self, id: &str, name: &str) -> Result<FileRecord> {
        let record = FileRecord::new_root(id, name);
        self.store.insert_unique(&record)?;
        debug!(id = %id, name = %name, "root created");
        Ok(record)
    }

    pub fn roots(&self) -> Result<Vec<FileRecord>> {
        self.store.roots()
    }

    /// Removes the record and every descendant, returning the removed ids.
    pub fn destroy(&self, id: &str) -> Result<Vec<String>> {
        Ok(tree::destroy_subtree(self, id)?
            .into_iter()
            .map(|record| record.id().to_string())
            .collect())
    }

    fn new_child(
        &self,
        parent_id: &str,
        id: &str,
        mime_type: &str,
        name: &str,
        size: u64,
    ) -> Result<FileRecord> {
        let parent = self.find(parent_id)?;
        if !parent.is_folder() {
            return Err(Error::InvalidResourceType(format!(
                "parent {parent_id} is not a folder"
            )));
        }
        Ok(FileRecord::new(id, parent_id, mime_type, name, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaConfig;
    use crate::metastore::{Durability, FjallStore};

    // A1 (folder) -> B1 (b.txt)
    fn fixture(dir: &tempfile::TempDir) -> Metadata {
        let config = MetaConfig {
            root: dir.path().to_path_buf(),
            durability: Durability::Buffer,
        };
        let meta = Metadata::new(Arc::new(FjallStore::open(&config).unwrap()));
        meta.create_root("A1", "A").unwrap();
        meta.create("A1", "B1", "text/plain", "b.txt", 10).unwrap();
        meta
    }

    #[test]
    fn test_find() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert_eq!(meta.find("B1").unwrap().name(), "b.txt");
        assert!(matches!(meta.find("DOES-NOT-EXIST"), Err(Error::InvalidResource(_))));
    }

    #[test]
    fn test_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert!(meta.is_directory("A1").unwrap());
        assert!(!meta.is_directory("B1").unwrap());
        assert!(matches!(
            meta.is_directory("does-not-exist"),
            Err(Error::InvalidResource(_))
        ));
    }

    #[test]
    fn test_find_children_of_unknown_id_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert!(meta.find_children("nope").unwrap().is_empty());
        assert_eq!(meta.find_children("A1").unwrap().len(), 1);
    }

    #[test]
    fn test_find_child_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        meta.create("A1", "B2", "text/plain", "b.txt", 4).unwrap();
        assert!(matches!(
            meta.find_child("A1", "b.txt"),
            Err(Error::InvalidResource(_))
        ));
        assert!(matches!(meta.lookup_child("A1", "b.txt"), Err(Error::InvalidResource(_))));
        assert!(meta.lookup_child("A1", "missing").unwrap().is_none());
    }

    #[test]
    fn test_create() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let media = meta.create("A1", "M1", "folder", "media", 100).unwrap();
        assert_eq!(media.mime_type(), "folder");
        assert_eq!(media.size(), 100);
        assert_eq!(media.parents(), ["A1".to_string()]);
        assert_eq!(media.date_created(), media.last_modified());

        assert!(matches!(
            meta.create("missing", "X1", "text/plain", "x", 0),
            Err(Error::InvalidResource(_))
        ));
        assert!(matches!(
            meta.create("B1", "X1", "text/plain", "x", 0),
            Err(Error::InvalidResourceType(_))
        ));
        assert!(matches!(
            meta.create_unique("A1", "X1", "text/plain", "b.txt", 0),
            Err(Error::ResourceExists(_))
        ));
    }

    #[test]
    fn test_update() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let before = meta.find("B1").unwrap();
        let after = meta.update("B1", RecordPatch::size(42)).unwrap();
        assert_eq!(after.size(), 42);
        assert!(after.last_modified() >= before.last_modified());
        assert_eq!(meta.find("B1").unwrap().size(), 42);

        assert!(matches!(
            meta.update("nope", RecordPatch::touch()),
            Err(Error::InvalidResource(_))
        ));
    }

    #[test]
    fn test_update_keeps_sibling_names_unique() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        meta.create("A1", "C1", "text/plain", "c.txt", 1).unwrap();
        assert!(matches!(
            meta.update("C1", RecordPatch::name("b.txt")),
            Err(Error::ResourceExists(_))
        ));
        assert_eq!(meta.find_child("A1", "b.txt").unwrap().id(), "B1");

        meta.create_root("D1", "D").unwrap();
        meta.create("D1", "B2", "text/plain", "b.txt", 2).unwrap();
        assert!(matches!(
            meta.update("B1", RecordPatch::parents(vec!["D1".to_string()])),
            Err(Error::ResourceExists(_))
        ));
        assert_eq!(meta.find("B1").unwrap().parents(), ["A1".to_string()]);

        // renaming onto its own name is not a clash
        assert_eq!(meta.update("B1", RecordPatch::name("b.txt")).unwrap().name(), "b.txt");
    }

    #[test]
    fn test_destroy_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let mut removed = meta.destroy("A1").unwrap();
        removed.sort();
        assert_eq!(removed, vec!["A1", "B1"]);
        assert!(matches!(meta.find("A1"), Err(Error::InvalidResource(_))));
        assert!(matches!(meta.find("B1"), Err(Error::InvalidResource(_))));
        assert!(matches!(meta.destroy("A1"), Err(Error::InvalidResource(_))));
    }
}
