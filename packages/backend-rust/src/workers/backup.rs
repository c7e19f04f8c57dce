use std::sync::Arc;

use tracing::info;

use crate::backup::{backup_database, prune_backups};
use crate::config::BackupConfig;
use crate::db::DatabaseProxy;

pub async fn run_backup(db: Arc<DatabaseProxy>, config: BackupConfig) -> Result<(), super::WorkerError> {
    let path = backup_database(db.pool(), &config.dir).await?;
    let removed = prune_backups(&config.dir, config.keep).await?;

    info!(path = %path.display(), removed, "Scheduled backup completed");
    Ok(())
}
