//! SQLite 备份：`VACUUM INTO` 生成一致的快照文件，并按数量保留最近的备份。

use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;

const BACKUP_PREFIX: &str = "tingxie_";
const BACKUP_SUFFIX: &str = ".db";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backup path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn is_backup_file(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
}

async fn next_backup_path(dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = dir.join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = dir.join(format!("{BACKUP_PREFIX}{stamp}_{n}{BACKUP_SUFFIX}"));
        n += 1;
    }
    candidate
}

/// Writes a snapshot of the database into `dir` and returns its path.
pub async fn backup_database(pool: &SqlitePool, dir: &Path) -> Result<PathBuf, BackupError> {
    tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;

    let target = next_backup_path(dir).await;
    let target_str = target
        .to_str()
        .ok_or_else(|| BackupError::InvalidPath(target.clone()))?;

    sqlx::query("VACUUM INTO ?")
        .bind(target_str)
        .execute(pool)
        .await?;

    tracing::info!(path = %target.display(), "database backup written");
    Ok(target)
}

/// Deletes the oldest backups so that at most `keep` remain. Returns the
/// number of files removed.
pub async fn prune_backups(dir: &Path, keep: usize) -> Result<usize, BackupError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(io_error(dir)(err)),
    };

    let mut backups: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let name = entry.file_name();
        if name.to_str().is_some_and(is_backup_file) {
            backups.push(entry.path());
        }
    }
    // timestamped names sort chronologically
    backups.sort();

    let excess = backups.len().saturating_sub(keep);
    for path in backups.iter().take(excess) {
        tokio::fs::remove_file(path).await.map_err(io_error(path))?;
        tracing::debug!(path = %path.display(), "old backup removed");
    }
    Ok(excess)
}
