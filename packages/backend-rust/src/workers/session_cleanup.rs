use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::auth::now_ms;
use crate::db::DatabaseProxy;

pub async fn cleanup_expired_sessions(db: Arc<DatabaseProxy>) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    debug!("Starting session cleanup cycle");

    let expired_sessions = delete_expired_sessions(db.pool(), now_ms()).await?;

    info!(
        expired_sessions,
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Session cleanup completed"
    );
    Ok(())
}

pub(crate) async fn delete_expired_sessions(pool: &SqlitePool, now_ms: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "sessions" WHERE "expires_at" < ?"#)
        .bind(now_ms)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
