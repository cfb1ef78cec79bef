//! Subtree-wide operations: destroy, copy and search.
//!
//! Trees are walked level by level from an explicit worklist instead of by
//! recursive fan-out, so the depth and width of a tree never translate into
//! unbounded concurrency. Content store calls of one level run concurrently,
//! at most `concurrency` at a time.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, trace};

use crate::cas::ContentStore;
use crate::error::{Error, Result};
use crate::metastore::{FileRecord, Metadata};

/// Mapping from a copied record to its copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPair {
    pub original_id: String,
    pub new_id: String,
}

/// Record filter for `search`. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub name: Option<String>,
    pub name_contains: Option<String>,
    pub mime_type: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl SearchQuery {
    pub fn matches(&self, record: &FileRecord) -> bool {
        if let Some(name) = &self.name {
            if record.name() != name {
                return false;
            }
        }
        if let Some(fragment) = &self.name_contains {
            if !record.name().contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(mime_type) = &self.mime_type {
            if record.mime_type() != mime_type {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if record.size() < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if record.size() > max {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Size,
    DateCreated,
    LastModified,
}

/// Ordering for search results, parsed from `field` or `field:desc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl FromStr for SortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (field, direction) = match s.split_once(':') {
            Some((field, direction)) => (field, direction),
            None => (s, "asc"),
        };
        let field = match field {
            "name" => SortField::Name,
            "size" => SortField::Size,
            "dateCreated" | "date_created" => SortField::DateCreated,
            "lastModified" | "last_modified" => SortField::LastModified,
            other => {
                return Err(Error::InvalidParameters(format!("cannot sort by '{other}'")));
            }
        };
        let descending = match direction {
            "asc" => false,
            "desc" => true,
            other => {
                return Err(Error::InvalidParameters(format!(
                    "unknown sort direction '{other}'"
                )));
            }
        };
        Ok(SortSpec { field, descending })
    }
}

impl SortSpec {
    fn sort(&self, records: &mut [FileRecord]) {
        match self.field {
            SortField::Name => records.sort_by(|a, b| a.name().cmp(b.name())),
            SortField::Size => records.sort_by_key(|r| r.size()),
            SortField::DateCreated => records.sort_by_key(|r| r.date_created_millis()),
            SortField::LastModified => records.sort_by_key(|r| r.last_modified_millis()),
        }
        if self.descending {
            records.reverse();
        }
    }
}

/// Collects the subtree rooted at `root`, one `Vec` per depth.
///
/// A record reachable through several parents is listed once, at the first
/// depth it is seen.
fn collect_levels(meta: &Metadata, root: FileRecord, max_depth: Option<usize>) -> Result<Vec<Vec<FileRecord>>> {
    let mut seen = HashSet::new();
    seen.insert(root.id().to_string());
    let mut levels = vec![vec![root]];

    loop {
        if max_depth.map_or(false, |max| levels.len() > max) {
            break;
        }
        let mut next = Vec::new();
        for record in levels.last().into_iter().flatten() {
            if !record.is_folder() {
                continue;
            }
            for child in meta.find_children(record.id())? {
                if seen.insert(child.id().to_string()) {
                    next.push(child);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        levels.push(next);
    }
    Ok(levels)
}

/// Removes `id` and all of its descendants from the metadata store,
/// deepest level first so that no record is ever left without a parent.
///
/// Returns the removed records. A descendant that disappears while the
/// subtree is being removed is skipped, not reported as an error.
pub(crate) fn destroy_subtree(meta: &Metadata, id: &str) -> Result<Vec<FileRecord>> {
    let root = meta.find(id)?;
    let levels = collect_levels(meta, root, None)?;

    let mut removed = Vec::new();
    for level in levels.into_iter().rev() {
        for record in level {
            match meta.store().remove(record.id())? {
                Some(record) => removed.push(record),
                None => debug!(id = %record.id(), "record already removed"),
            }
        }
    }
    debug!(id = %id, removed = removed.len(), "subtree destroyed");
    Ok(removed)
}

/// Whether `candidate` is `ancestor` or lies somewhere below it.
pub(crate) fn is_within(meta: &Metadata, candidate: &str, ancestor: &str) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([candidate.to_string()]);
    while let Some(id) = queue.pop_front() {
        if id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(record) = meta.store().get(&id)? {
            queue.extend(record.parents().iter().cloned());
        }
    }
    Ok(false)
}

/// Copies `id` (and, for folders, everything below it) into `destination_id`.
///
/// Every node gets a fresh id; file bytes are duplicated in the content store
/// before the new record is written. Returns one pair per copied node.
pub(crate) async fn copy_subtree(
    meta: &Metadata,
    content: &dyn ContentStore,
    id: &str,
    destination_id: &str,
    concurrency: usize,
) -> Result<Vec<CopyPair>> {
    let destination = meta.find(destination_id)?;
    if !destination.is_folder() {
        return Err(Error::InvalidResourceType(format!(
            "copy destination {destination_id} is not a folder"
        )));
    }
    let source = meta.find(id)?;
    if source.is_folder() && is_within(meta, destination_id, id)? {
        return Err(Error::InvalidAction(format!(
            "cannot copy {id} into itself or one of its descendants"
        )));
    }

    let mut pairs = Vec::new();
    let mut level = vec![(source, destination_id.to_string())];
    while !level.is_empty() {
        let results: Vec<Result<(FileRecord, CopyPair)>> = stream::iter(level)
            .map(|(record, parent_id)| copy_node(meta, content, record, parent_id))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        // let the whole level settle before reporting the first failure
        let mut next = Vec::new();
        let mut failure = None;
        for result in results {
            match result {
                Ok((original, pair)) => {
                    if failure.is_none() && original.is_folder() {
                        for child in meta.find_children(original.id())? {
                            next.push((child, pair.new_id.clone()));
                        }
                    }
                    pairs.push(pair);
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        level = next;
    }

    debug!(id = %id, destination = %destination_id, copied = pairs.len(), "subtree copied");
    Ok(pairs)
}

async fn copy_node(
    meta: &Metadata,
    content: &dyn ContentStore,
    record: FileRecord,
    parent_id: String,
) -> Result<(FileRecord, CopyPair)> {
    let new_id = uuid::Uuid::new_v4().to_string();
    if !record.is_folder() {
        content.copy(record.id(), &new_id).await?;
    }
    meta.create(
        &parent_id,
        &new_id,
        record.mime_type(),
        record.name(),
        record.size(),
    )?;
    trace!(from = %record.id(), to = %new_id, parent = %parent_id, "node copied");

    let pair = CopyPair {
        original_id: record.id().to_string(),
        new_id,
    };
    Ok((record, pair))
}

/// Matches `query` against the record at `id` and its descendants.
///
/// With `shallow` set only the record itself and its direct children are
/// considered. Without `sort` the order of the results is unspecified.
pub(crate) fn search_subtree(
    meta: &Metadata,
    id: &str,
    query: &SearchQuery,
    sort: Option<SortSpec>,
    shallow: bool,
) -> Result<Vec<FileRecord>> {
    let root = meta.find(id)?;
    let max_depth = if shallow { Some(1) } else { None };

    let mut found: Vec<FileRecord> = collect_levels(meta, root, max_depth)?
        .into_iter()
        .flatten()
        .filter(|record| query.matches(record))
        .collect();
    if let Some(sort) = sort {
        sort.sort(&mut found);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::MetaConfig;
    use crate::metastore::{Durability, FjallStore};

    // root
    // ├── level1
    // │   ├── level2
    // │   │   └── test.txt
    // │   └── notes.md
    // └── top.txt
    fn fixture(dir: &tempfile::TempDir) -> Metadata {
        let config = MetaConfig {
            root: dir.path().to_path_buf(),
            durability: Durability::Buffer,
        };
        let meta = Metadata::new(Arc::new(FjallStore::open(&config).unwrap()));
        meta.create_root("root", "root").unwrap();
        meta.create("root", "level1", "folder", "level1", 0).unwrap();
        meta.create("level1", "level2", "folder", "level2", 0).unwrap();
        meta.create("level2", "test.txt", "text/plain", "test.txt", 12).unwrap();
        meta.create("level1", "notes.md", "text/markdown", "notes.md", 300).unwrap();
        meta.create("root", "top.txt", "text/plain", "top.txt", 7).unwrap();
        meta
    }

    fn ids(records: &[FileRecord]) -> Vec<String> {
        let mut ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_destroy_subtree_removes_closure() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let removed = destroy_subtree(&meta, "level1").unwrap();
        assert_eq!(ids(&removed), vec!["level1", "level2", "notes.md", "test.txt"]);
        // deepest first
        assert_eq!(removed[0].id(), "test.txt");
        assert_eq!(removed.last().unwrap().id(), "level1");

        assert!(meta.find("test.txt").is_err());
        assert!(meta.find("top.txt").is_ok());
        assert_eq!(ids(&meta.find_children("root").unwrap()), vec!["top.txt"]);
    }

    #[test]
    fn test_destroy_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let removed = destroy_subtree(&meta, "top.txt").unwrap();
        assert_eq!(ids(&removed), vec!["top.txt"]);
    }

    #[test]
    fn test_is_within() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert!(is_within(&meta, "test.txt", "level1").unwrap());
        assert!(is_within(&meta, "level1", "level1").unwrap());
        assert!(!is_within(&meta, "top.txt", "level1").unwrap());
    }

    #[test]
    fn test_search_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let query = SearchQuery {
            mime_type: Some("text/plain".to_string()),
            ..Default::default()
        };
        let found = search_subtree(&meta, "root", &query, None, false).unwrap();
        assert_eq!(ids(&found), vec!["test.txt", "top.txt"]);

        let everything = search_subtree(&meta, "root", &SearchQuery::default(), None, false).unwrap();
        assert_eq!(everything.len(), 6);
    }

    #[test]
    fn test_search_shallow() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let found = search_subtree(&meta, "root", &SearchQuery::default(), None, true).unwrap();
        assert_eq!(ids(&found), vec!["level1", "root", "top.txt"]);
    }

    #[test]
    fn test_search_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let query = SearchQuery {
            min_size: Some(1),
            ..Default::default()
        };
        let sort: SortSpec = "size:desc".parse().unwrap();
        let found = search_subtree(&meta, "root", &query, Some(sort), false).unwrap();
        let names: Vec<&str> = found.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["notes.md", "test.txt", "top.txt"]);
    }

    #[test]
    fn test_search_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let err = search_subtree(&meta, "nope", &SearchQuery::default(), None, false).unwrap_err();
        assert!(matches!(err, Error::InvalidResource(_)));
    }

    #[test]
    fn test_sort_spec_parsing() {
        assert_eq!(
            "name".parse::<SortSpec>().unwrap(),
            SortSpec {
                field: SortField::Name,
                descending: false
            }
        );
        assert!("owner".parse::<SortSpec>().is_err());
        assert!("size:sideways".parse::<SortSpec>().is_err());
    }
}
