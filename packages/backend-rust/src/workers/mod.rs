mod backup;
mod review_reminder;
mod session_cleanup;

use std::future::Future;
use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::{BackupConfig, Config, WorkerConfig};
use crate::db::DatabaseProxy;
use crate::state::local_offset;

pub use session_cleanup::cleanup_expired_sessions;

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    db_proxy: Arc<DatabaseProxy>,
    workers: WorkerConfig,
    backup: BackupConfig,
    offset: FixedOffset,
}

impl WorkerManager {
    pub async fn new(db_proxy: Arc<DatabaseProxy>, config: &Config) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            db_proxy,
            workers: config.workers.clone(),
            backup: config.backup.clone(),
            offset: local_offset(config.tz_offset_hours),
        })
    }

    pub fn is_leader(&self) -> bool {
        self.workers.leader
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        if !self.is_leader() {
            info!("WORKER_LEADER not set, skipping worker startup");
            return Ok(());
        }
        info!("Starting workers (leader mode)");

        let scheduler = self.scheduler.lock().await;

        self.add_job(
            &scheduler,
            &self.workers.session_cleanup_schedule,
            "session_cleanup",
            cleanup_expired_sessions,
        )
        .await?;

        let offset = self.offset;
        self.add_job(
            &scheduler,
            &self.workers.review_reminder_schedule,
            "review_reminder",
            move |db| review_reminder::run_review_reminders(db, offset),
        )
        .await?;

        let backup_config = self.backup.clone();
        self.add_job(
            &scheduler,
            &self.workers.backup_schedule,
            "backup",
            move |db| backup::run_backup(db, backup_config.clone()),
        )
        .await?;

        scheduler.start().await?;
        info!("All workers started");
        Ok(())
    }

    async fn add_job<F, Fut>(
        &self,
        scheduler: &JobScheduler,
        schedule: &str,
        name: &'static str,
        run: F,
    ) -> Result<(), WorkerError>
    where
        F: Fn(Arc<DatabaseProxy>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let db = Arc::clone(&self.db_proxy);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let db = Arc::clone(&db);
            let run = run.clone();
            let mut rx = shutdown_rx.resubscribe();
            Box::pin(async move {
                tokio::select! {
                    _ = rx.recv() => {},
                    result = run(db) => {
                        if let Err(e) = result {
                            error!(error = %e, worker = name, "Worker error");
                        }
                    }
                }
            })
        })?;
        scheduler.add(job).await?;
        info!(worker = name, schedule = %schedule, "Worker scheduled");
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.is_leader() {
            return;
        }

        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }
        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Backup error: {0}")]
    Backup(#[from] crate::backup::BackupError),
}
