pub mod migrate;

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::Config;

#[derive(Clone)]
pub struct DatabaseProxy {
    url: String,
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DbCheckStatus {
    Connected { latency_ms: u64 },
    Timeout,
    Disconnected,
}

impl DatabaseProxy {
    pub async fn from_config(config: &Config) -> Result<Arc<Self>, DbInitError> {
        Self::connect(&config.database_url, config.db_max_connections).await
    }

    /// Opens the pool and applies pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Arc<Self>, DbInitError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
            let filename = options.clone().get_filename();
            if let Some(parent) = filename.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(DbInitError::Io)?;
                }
            }
        }

        // Every in-memory connection is a separate database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        migrate::run_migrations(&pool).await?;

        tracing::info!(in_memory, "database ready");

        Ok(Arc::new(Self {
            url: url.to_string(),
            pool,
        }))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.url
    }

    pub async fn check(&self, timeout: Duration) -> DbCheckStatus {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&self.pool)).await;

        match result {
            Ok(Ok(_)) => DbCheckStatus::Connected {
                latency_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "database health check failed");
                DbCheckStatus::Disconnected
            }
            Err(_) => DbCheckStatus::Timeout,
        }
    }

    pub async fn delete_session_by_token_hash(&self, token_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(r#"DELETE FROM "sessions" WHERE "token_hash" = ?"#)
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] migrate::MigrationError),
    #[error("failed to create database directory: {0}")]
    Io(std::io::Error),
}
