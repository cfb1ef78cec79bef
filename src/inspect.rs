use std::path::PathBuf;

use anyhow::Result;

use crate::config::MetaConfig;
use crate::metastore::{Durability, FjallStore, MetaStore};

fn open_meta_store(meta_root: PathBuf) -> Result<FjallStore> {
    let config = MetaConfig {
        root: meta_root,
        durability: Durability::Buffer,
    };
    Ok(FjallStore::open(&config)?)
}

/// Number of file and folder records in the metadata store.
pub fn num_keys(meta_root: PathBuf) -> Result<usize> {
    let store = open_meta_store(meta_root)?;
    let count = store.num_records()?;
    store.close()?;
    Ok(count)
}

pub fn disk_space(meta_root: PathBuf) -> Result<u64> {
    let store = open_meta_store(meta_root)?;
    let space = store.disk_space();
    store.close()?;
    Ok(space)
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::Metadata;
    use std::sync::Arc;

    #[test]
    fn test_num_keys() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(open_meta_store(dir.path().to_path_buf()).unwrap());
            let meta = Metadata::new(store.clone());
            meta.create_root("A1", "A").unwrap();
            meta.create("A1", "B1", "text/plain", "b.txt", 10).unwrap();
            store.close().unwrap();
        }
        assert_eq!(num_keys(dir.path().to_path_buf()).unwrap(), 2);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }
}
