use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::StoreArgs;
use crate::metrics::SharedMetrics;
use crate::vfs::TreeFs;

#[derive(Parser, Debug)]
pub struct RetrieveConfig {
    #[arg(required = true, help = "File id")]
    pub id: String,

    #[arg(required = true, help = "Destination file path")]
    pub dest: PathBuf,
}

#[tokio::main]
pub async fn retrieve(store: &StoreArgs, args: RetrieveConfig) -> Result<()> {
    let config = store.load()?;
    let fs = TreeFs::open(&config, SharedMetrics::default())?;

    let (data, info) = fs.fetch(&args.id).await?;

    let mut file = tokio::fs::File::create(&args.dest).await?;
    file.write_all(&data).await?;
    // Ensure all data is written to disk
    file.flush().await?;

    info!(
        id = %args.id,
        dest = %args.dest.display(),
        size = info.size,
        etag = %info.etag,
        "file retrieved"
    );
    Ok(())
}
