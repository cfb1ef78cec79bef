use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::metastore::Durability;

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
/// Environment variable naming the configuration file when `--config` is absent.
pub const CONFIG_ENV: &str = "TREEFS_CONFIG";

/// Content store configuration.
///
/// `bucket` and `region` are required. Blobs live under `fs_root/bucket`;
/// `endpoint` is the public base URL handed out by `read`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub bucket: String,
    pub region: String,
    pub fs_root: PathBuf,
    pub endpoint: Option<String>,
}

impl ContentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::InvalidConfig("content.bucket is required".to_string()));
        }
        if self.region.trim().is_empty() {
            return Err(Error::InvalidConfig("content.region is required".to_string()));
        }
        if self.bucket.contains('/') || self.bucket == "." || self.bucket == ".." {
            return Err(Error::InvalidConfig(format!(
                "content.bucket '{}' is not a valid bucket name",
                self.bucket
            )));
        }
        Ok(())
    }
}

/// Metadata store configuration. The keyspace lives in `root/db`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    pub root: PathBuf,
    pub durability: Durability,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            durability: Durability::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest accepted content body, in bytes.
    pub max_upload_size: usize,
    /// Upper bound on concurrent content store calls during tree operations.
    pub max_concurrency: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Configuration file structure for treefs.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub content: ContentConfig,
    pub meta: MetaConfig,
    pub limits: Limits,
}

impl Config {
    /// Load the configuration from a TOML file and validate it.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {}", e)))
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.content.validate()?;
        if self.limits.max_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "limits.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store options shared by every command that opens the filesystem.
///
/// Flags override the matching values of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    #[arg(long, short, global = true, help = "TOML configuration file (or TREEFS_CONFIG)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory holding the content bucket")]
    pub fs_root: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory holding the metadata keyspace")]
    pub meta_root: Option<PathBuf>,

    #[arg(long, global = true)]
    pub bucket: Option<String>,

    #[arg(long, global = true)]
    pub region: Option<String>,

    #[arg(long, global = true, help = "Public base URL for content links")]
    pub endpoint: Option<String>,

    #[arg(long, global = true, help = "Durability level (buffer, fsync, fdatasync)")]
    pub durability: Option<Durability>,
}

impl StoreArgs {
    /// Builds the effective configuration and validates it.
    pub fn load(&self) -> Result<Config> {
        let config = self.resolve()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the effective configuration without validating it.
    pub fn resolve(&self) -> Result<Config> {
        let path = self
            .config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = match path {
            Some(path) => Config::parse_file(&path)?,
            None => Config::default(),
        };

        if let Some(fs_root) = &self.fs_root {
            config.content.fs_root = fs_root.clone();
        }
        if let Some(meta_root) = &self.meta_root {
            config.meta.root = meta_root.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.content.bucket = bucket.clone();
        }
        if let Some(region) = &self.region {
            config.content.region = region.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.content.endpoint = Some(endpoint.clone());
        }
        if let Some(durability) = self.durability {
            config.meta.durability = durability;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[content]
bucket = "files"
region = "eu-west-1"
fs_root = "/var/lib/treefs/blobs"

[meta]
root = "/var/lib/treefs/meta"
durability = "fsync"

[limits]
max_concurrency = 4
"#;

        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.content.bucket, "files");
        assert_eq!(config.meta.durability, Durability::Fsync);
        assert_eq!(config.limits.max_concurrency, 4);
        assert_eq!(config.limits.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
    }

    #[test]
    fn test_missing_bucket_is_invalid() {
        let toml_content = r#"
[content]
region = "eu-west-1"
"#;
        let err = Config::from_toml(toml_content).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_region_is_invalid() {
        let config = ContentConfig {
            bucket: "files".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treefs.toml");
        fs::write(
            &path,
            "[content]\nbucket = \"files\"\nregion = \"eu-west-1\"\n",
        )
        .unwrap();

        let args = StoreArgs {
            config: Some(path),
            bucket: Some("archive".to_string()),
            durability: Some(Durability::Buffer),
            ..Default::default()
        };
        let config = args.load().unwrap();
        assert_eq!(config.content.bucket, "archive");
        assert_eq!(config.content.region, "eu-west-1");
        assert_eq!(config.meta.durability, Durability::Buffer);
    }
}
