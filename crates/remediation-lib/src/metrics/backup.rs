//! Writing metric backups to disk

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{BackupDocument, BackupMetadata, MetricsApi};
use crate::error::Result;

/// Name of the pointer to the most recent backup
pub const LATEST_FILE: &str = "latest.json";

/// Settings for a backup run
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub dir: PathBuf,
    pub namespace: String,
    pub metric_type: Option<String>,
}

/// Files produced by a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupResult {
    pub file: PathBuf,
    pub metadata_file: PathBuf,
    pub latest: PathBuf,
    pub count: usize,
}

/// Fetch the listing and write it, with its metadata sidecar, to the
/// backup directory. Any failure aborts the backup.
pub async fn write_backup<A: MetricsApi + ?Sized>(
    api: &A,
    options: &BackupOptions,
) -> Result<BackupResult> {
    let body = api.list_raw(options.metric_type.as_deref()).await?;
    let document = BackupDocument::parse(&body)?;
    store(&body, &document, api.base_url(), options, Utc::now()).await
}

async fn store(
    body: &str,
    document: &BackupDocument,
    route: &str,
    options: &BackupOptions,
    at: DateTime<Utc>,
) -> Result<BackupResult> {
    fs::create_dir_all(&options.dir).await?;

    let base = format!(
        "trustyai-metrics-{}-{}",
        options.namespace,
        at.format("%Y%m%d-%H%M%S")
    );
    let (stem, file) = create_unique(&options.dir, &base, body).await?;
    let file_name = format!("{}.json", stem);
    let metadata_file = options.dir.join(format!("{}.meta.json", stem));

    let metadata = BackupMetadata {
        timestamp: at.to_rfc3339(),
        namespace: options.namespace.clone(),
        route: route.to_string(),
        metric_type: options.metric_type.clone(),
        count: document.requests.len(),
        backup_file: file_name.clone(),
    };
    fs::write(&metadata_file, serde_json::to_string_pretty(&metadata)?).await?;

    let latest = options.dir.join(LATEST_FILE);
    point_latest(&latest, &file_name, &file).await?;

    info!(
        event = "backup_written",
        namespace = %options.namespace,
        file = %file.display(),
        count = metadata.count,
        "Metric backup written"
    );

    Ok(BackupResult {
        file,
        metadata_file,
        latest,
        count: metadata.count,
    })
}

/// Write `body` to `<base>.json`, or `<base>-N.json` when backups taken in
/// the same second already exist. Returns the chosen stem and path.
async fn create_unique(dir: &Path, base: &str, body: &str) -> Result<(String, PathBuf)> {
    let mut attempt = 0u32;
    loop {
        let stem = match attempt {
            0 => base.to_string(),
            n => format!("{}-{}", base, n),
        };
        let path = dir.join(format!("{}.json", stem));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(body.as_bytes()).await?;
                file.flush().await?;
                return Ok((stem, path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(unix)]
async fn point_latest(latest: &Path, file_name: &str, _file: &Path) -> Result<()> {
    if fs::symlink_metadata(latest).await.is_ok() {
        fs::remove_file(latest).await?;
    }
    fs::symlink(file_name, latest).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn point_latest(latest: &Path, _file_name: &str, file: &Path) -> Result<()> {
    fs::copy(file, latest).await?;
    Ok(())
}
