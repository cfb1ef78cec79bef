use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::{debug, info, warn};

use super::{Durability, FileRecord, MetaStore};
use crate::config::MetaConfig;
use crate::error::{Error, Result};

const FILES_PARTITION: &str = "_FILES";
const CHILDREN_PARTITION: &str = "_CHILDREN";
const SEPARATOR: u8 = 0;

/// Metadata store backed by an embedded fjall keyspace.
///
/// `_FILES` maps id to the bincode-encoded record. `_CHILDREN` holds one
/// empty-valued key `parent \0 name \0 id` per parent of every record, so
/// child listings and name lookups are prefix scans. Roots are indexed under
/// the empty parent.
pub struct FjallStore {
    path: PathBuf,
    durability: Durability,
    inner: RwLock<Option<Arc<Inner>>>,
}

struct Inner {
    keyspace: Keyspace,
    files: PartitionHandle,
    children: PartitionHandle,
    // serializes index maintenance and check-then-insert
    write_lock: Mutex<()>,
}

impl fmt::Debug for FjallStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FjallStore")
            .field("path", &self.path)
            .field("durability", &self.durability)
            .finish()
    }
}

impl FjallStore {
    pub fn new(config: &MetaConfig) -> Self {
        Self {
            path: config.root.join("db"),
            durability: config.durability,
            inner: RwLock::new(None),
        }
    }

    /// Creates and connects a store in one step.
    pub fn open(config: &MetaConfig) -> Result<Self> {
        let store = Self::new(config);
        store.connect()?;
        Ok(store)
    }

    fn inner(&self) -> Result<Arc<Inner>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| Error::Backend("metadata store lock poisoned".to_string()))?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| Error::DefaultServerError("metadata store is not connected".to_string()))
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        let mode = match self.durability {
            Durability::Buffer => return Ok(()),
            Durability::Fsync => PersistMode::SyncAll,
            Durability::Fdatasync => PersistMode::SyncData,
        };
        inner.keyspace.persist(mode)?;
        Ok(())
    }

    /// Writes `record` and its index keys, dropping the index keys of
    /// `previous`. Caller holds the write lock.
    fn write_locked(
        &self,
        inner: &Inner,
        record: &FileRecord,
        previous: Option<&FileRecord>,
    ) -> Result<()> {
        let mut batch = inner.keyspace.batch();
        if let Some(previous) = previous {
            for key in index_keys(previous) {
                batch.remove(&inner.children, key);
            }
        }
        batch.insert(&inner.files, record.id().as_bytes(), record.to_vec()?);
        for key in index_keys(record) {
            batch.insert(&inner.children, key, Vec::<u8>::new());
        }
        batch.commit()?;
        self.persist(inner)
    }

    fn get_with(&self, inner: &Inner, id: &str) -> Result<Option<FileRecord>> {
        match inner.files.get(id.as_bytes())? {
            Some(data) => Ok(Some(FileRecord::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn scan_index(&self, inner: &Inner, prefix: Vec<u8>) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        for item in inner.children.prefix(prefix) {
            let (key, _) = item?;
            let id = match key.rsplit(|b| *b == SEPARATOR).next() {
                Some(id) => String::from_utf8_lossy(id).into_owned(),
                None => continue,
            };
            match self.get_with(inner, &id)? {
                Some(record) => records.push(record),
                // removed between the scan and the lookup
                None => debug!(id = %id, "index entry without record"),
            }
        }
        Ok(records)
    }
}

impl MetaStore for FjallStore {
    fn connect(&self) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::Backend("metadata store lock poisoned".to_string()))?;
        if guard.is_some() {
            return Ok(());
        }

        let keyspace = Config::new(&self.path).open()?;
        let files = keyspace.open_partition(FILES_PARTITION, PartitionCreateOptions::default())?;
        let children =
            keyspace.open_partition(CHILDREN_PARTITION, PartitionCreateOptions::default())?;
        info!(path = %self.path.display(), "metadata store connected");

        *guard = Some(Arc::new(Inner {
            keyspace,
            files,
            children,
            write_lock: Mutex::new(()),
        }));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::Backend("metadata store lock poisoned".to_string()))?;
        if let Some(inner) = guard.take() {
            inner.keyspace.persist(PersistMode::SyncAll)?;
            info!(path = %self.path.display(), "metadata store closed");
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let inner = self.inner()?;
        self.get_with(&inner, id)
    }

    fn insert(&self, record: &FileRecord) -> Result<()> {
        let inner = self.inner()?;
        let _lock = inner
            .write_lock
            .lock()
            .map_err(|_| Error::Backend("metadata write lock poisoned".to_string()))?;
        let previous = self.get_with(&inner, record.id())?;
        self.write_locked(&inner, record, previous.as_ref())
    }

    fn insert_unique(&self, record: &FileRecord) -> Result<()> {
        let inner = self.inner()?;
        let _lock = inner
            .write_lock
            .lock()
            .map_err(|_| Error::Backend("metadata write lock poisoned".to_string()))?;

        for parent in parent_keys(record) {
            let prefix = name_prefix(parent, record.name());
            if inner.children.prefix(prefix).next().transpose()?.is_some() {
                return Err(Error::ResourceExists(format!(
                    "'{}' already exists in {}",
                    record.name(),
                    parent
                )));
            }
        }
        let previous = self.get_with(&inner, record.id())?;
        self.write_locked(&inner, record, previous.as_ref())
    }

    fn replace(&self, record: &FileRecord) -> Result<Option<FileRecord>> {
        let inner = self.inner()?;
        let _lock = inner
            .write_lock
            .lock()
            .map_err(|_| Error::Backend("metadata write lock poisoned".to_string()))?;
        let previous = match self.get_with(&inner, record.id())? {
            Some(previous) => previous,
            None => return Ok(None),
        };
        self.write_locked(&inner, record, Some(&previous))?;
        Ok(Some(previous))
    }

    fn replace_unique(&self, record: &FileRecord) -> Result<Option<FileRecord>> {
        let inner = self.inner()?;
        let _lock = inner
            .write_lock
            .lock()
            .map_err(|_| Error::Backend("metadata write lock poisoned".to_string()))?;
        let previous = match self.get_with(&inner, record.id())? {
            Some(previous) => previous,
            None => return Ok(None),
        };

        for parent in parent_keys(record) {
            for item in inner.children.prefix(name_prefix(parent, record.name())) {
                let (key, _) = item?;
                let owner = key.rsplit(|b| *b == SEPARATOR).next().unwrap_or_default();
                if owner != record.id().as_bytes() {
                    return Err(Error::ResourceExists(format!(
                        "'{}' already exists in {}",
                        record.name(),
                        parent
                    )));
                }
            }
        }
        self.write_locked(&inner, record, Some(&previous))?;
        Ok(Some(previous))
    }

    fn remove(&self, id: &str) -> Result<Option<FileRecord>> {
        let inner = self.inner()?;
        let _lock = inner
            .write_lock
            .lock()
            .map_err(|_| Error::Backend("metadata write lock poisoned".to_string()))?;
        let record = match self.get_with(&inner, id)? {
            Some(record) => record,
            None => return Ok(None),
        };

        let mut batch = inner.keyspace.batch();
        batch.remove(&inner.files, id.as_bytes());
        for key in index_keys(&record) {
            batch.remove(&inner.children, key);
        }
        batch.commit()?;
        self.persist(&inner)?;
        Ok(Some(record))
    }

    fn children(&self, parent_id: &str) -> Result<Vec<FileRecord>> {
        let inner = self.inner()?;
        let mut prefix = parent_id.as_bytes().to_vec();
        prefix.push(SEPARATOR);
        self.scan_index(&inner, prefix)
    }

    fn children_named(&self, parent_id: &str, name: &str) -> Result<Vec<FileRecord>> {
        let inner = self.inner()?;
        self.scan_index(&inner, name_prefix(parent_id, name))
    }

    fn num_records(&self) -> Result<usize> {
        let inner = self.inner()?;
        Ok(inner.files.len()?)
    }

    fn disk_space(&self) -> u64 {
        match self.inner() {
            Ok(inner) => inner.keyspace.disk_space(),
            Err(e) => {
                warn!(error = %e, "disk space requested on a closed store");
                0
            }
        }
    }
}

fn parent_keys(record: &FileRecord) -> Vec<&str> {
    if record.is_root() {
        vec![""]
    } else {
        record.parents().iter().map(String::as_str).collect()
    }
}

fn name_prefix(parent_id: &str, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(parent_id.len() + name.len() + 2);
    key.extend_from_slice(parent_id.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(name.as_bytes());
    key.push(SEPARATOR);
    key
}

fn index_keys(record: &FileRecord) -> Vec<Vec<u8>> {
    parent_keys(record)
        .into_iter()
        .map(|parent| {
            let mut key = name_prefix(parent, record.name());
            key.extend_from_slice(record.id().as_bytes());
            key
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::RecordPatch;

    fn open_store(dir: &tempfile::TempDir) -> FjallStore {
        let config = MetaConfig {
            root: dir.path().to_path_buf(),
            durability: Durability::Buffer,
        };
        FjallStore::open(&config).unwrap()
    }

    #[test]
    fn test_insert_and_children() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.insert(&FileRecord::new_root("A1", "A")).unwrap();
        store
            .insert(&FileRecord::new("B1", "A1", "text/plain", "b.txt", 10))
            .unwrap();
        store
            .insert(&FileRecord::new("C1", "A1", "folder", "c", 0))
            .unwrap();

        let mut children: Vec<String> = store
            .children("A1")
            .unwrap()
            .into_iter()
            .map(|r| r.id().to_string())
            .collect();
        children.sort();
        assert_eq!(children, vec!["B1", "C1"]);

        let roots = store.roots().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id(), "A1");

        let named = store.children_named("A1", "b.txt").unwrap();
        assert_eq!(named.len(), 1);
        assert!(store.children_named("A1", "b").unwrap().is_empty());
        assert_eq!(store.num_records().unwrap(), 3);
    }

    #[test]
    fn test_insert_unique_rejects_sibling_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.insert(&FileRecord::new_root("A1", "A")).unwrap();
        store
            .insert_unique(&FileRecord::new("B1", "A1", "text/plain", "b.txt", 10))
            .unwrap();
        let err = store
            .insert_unique(&FileRecord::new("B2", "A1", "text/plain", "b.txt", 3))
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExists(_)));
        assert!(store.get("B2").unwrap().is_none());
    }

    #[test]
    fn test_replace_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.insert(&FileRecord::new_root("A1", "A")).unwrap();
        store.insert(&FileRecord::new_root("D1", "D")).unwrap();
        let mut record = FileRecord::new("B1", "A1", "text/plain", "b.txt", 10);
        store.insert(&record).unwrap();

        record.apply(RecordPatch {
            parents: Some(vec!["D1".to_string()]),
            name: Some("renamed.txt".to_string()),
            size: None,
        });
        let previous = store.replace(&record).unwrap().unwrap();
        assert_eq!(previous.name(), "b.txt");

        assert!(store.children("A1").unwrap().is_empty());
        let moved = store.children_named("D1", "renamed.txt").unwrap();
        assert_eq!(moved.len(), 1);

        let ghost = FileRecord::new("X1", "A1", "text/plain", "x", 0);
        assert!(store.replace(&ghost).unwrap().is_none());
        assert!(store.get("X1").unwrap().is_none());
    }

    #[test]
    fn test_replace_unique_rejects_taken_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.insert(&FileRecord::new_root("A1", "A")).unwrap();
        store
            .insert(&FileRecord::new("B1", "A1", "text/plain", "b.txt", 10))
            .unwrap();
        let mut record = FileRecord::new("C1", "A1", "text/plain", "c.txt", 3);
        store.insert(&record).unwrap();

        // the record's own index entry does not count as a clash
        assert!(store.replace_unique(&record).unwrap().is_some());

        record.apply(RecordPatch::name("b.txt"));
        let err = store.replace_unique(&record).unwrap_err();
        assert!(matches!(err, Error::ResourceExists(_)));
        assert_eq!(store.get("C1").unwrap().unwrap().name(), "c.txt");
        assert_eq!(store.children_named("A1", "b.txt").unwrap().len(), 1);
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.insert(&FileRecord::new_root("A1", "A")).unwrap();
        store
            .insert(&FileRecord::new("B1", "A1", "text/plain", "b.txt", 10))
            .unwrap();

        assert!(store.remove("B1").unwrap().is_some());
        assert!(store.remove("B1").unwrap().is_none());
        assert!(store.children("A1").unwrap().is_empty());
    }

    #[test]
    fn test_connect_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.insert(&FileRecord::new_root("A1", "A")).unwrap();

        // idempotent
        store.connect().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get("A1"), Err(Error::DefaultServerError(_))));

        store.connect().unwrap();
        assert!(store.get("A1").unwrap().is_some());
    }
}
