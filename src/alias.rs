use tracing::trace;

use crate::error::{Error, Result};
use crate::metastore::Metadata;

/// Resolves a `/`-delimited path, relative to the record `root_id`, to the id
/// of the record it names.
///
/// Each segment must match exactly one child of the record resolved so far.
/// Leading and trailing separators are ignored and the empty path names the
/// root itself.
pub fn resolve(meta: &Metadata, full_path: &str, root_id: &str) -> Result<String> {
    let mut current = meta.find(root_id)?.id().to_string();

    let path = full_path.trim_matches('/');
    if path.is_empty() {
        return Ok(current);
    }

    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(Error::InvalidParameters(format!(
                "path '{full_path}' contains an empty segment"
            )));
        }
        current = meta.find_child(&current, segment)?.id().to_string();
        trace!(segment = %segment, id = %current, "path segment resolved");
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::MetaConfig;
    use crate::metastore::{Durability, FjallStore};

    const ROOT_ID: &str = "TEST-GUID-12345";

    // 12345/level1/level2/level3/test.txt
    fn fixture(dir: &tempfile::TempDir) -> Metadata {
        let config = MetaConfig {
            root: dir.path().to_path_buf(),
            durability: Durability::Buffer,
        };
        let meta = Metadata::new(Arc::new(FjallStore::open(&config).unwrap()));
        meta.create_root(ROOT_ID, "12345").unwrap();
        let mut parent = ROOT_ID.to_string();
        for name in ["level1", "level2", "level3"] {
            let id = format!("TEST-GUID-{name}");
            meta.create(&parent, &id, "folder", name, 0).unwrap();
            parent = id;
        }
        meta.create(&parent, "TEST-GUID-test.txt", "text/plain", "test.txt", 12345678)
            .unwrap();
        meta
    }

    #[test]
    fn test_resolves_valid_path() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        let id = resolve(&meta, "level1/level2/level3/test.txt", ROOT_ID).unwrap();
        assert_eq!(id, "TEST-GUID-test.txt");
        // idempotent
        assert_eq!(resolve(&meta, "/level1/level2/level3/test.txt", ROOT_ID).unwrap(), id);
    }

    #[test]
    fn test_empty_path_is_root() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert_eq!(resolve(&meta, "", ROOT_ID).unwrap(), ROOT_ID);
        assert_eq!(resolve(&meta, "/", ROOT_ID).unwrap(), ROOT_ID);
    }

    #[test]
    fn test_rejects_invalid_resource() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert!(matches!(
            resolve(&meta, "level1/level2/level3/notExist.txt", ROOT_ID),
            Err(Error::InvalidResource(_))
        ));
        assert!(matches!(
            resolve(&meta, "level1/level2/level3/test.txt/deeper", ROOT_ID),
            Err(Error::InvalidResource(_))
        ));
        assert!(matches!(
            resolve(&meta, "level1", "no-such-root"),
            Err(Error::InvalidResource(_))
        ));
    }

    #[test]
    fn test_rejects_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let meta = fixture(&dir);

        assert!(matches!(
            resolve(&meta, "level1//level2", ROOT_ID),
            Err(Error::InvalidParameters(_))
        ));
    }
}
