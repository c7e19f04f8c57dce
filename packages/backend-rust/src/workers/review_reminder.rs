use std::sync::Arc;
use std::time::Instant;

use chrono::FixedOffset;
use tracing::info;

use crate::auth::now_ms;
use crate::db::DatabaseProxy;
use crate::services::reminders::generate_reminders;

pub async fn run_review_reminders(
    db: Arc<DatabaseProxy>,
    offset: FixedOffset,
) -> Result<(), super::WorkerError> {
    let start = Instant::now();
    let stats = generate_reminders(db.pool(), now_ms(), offset).await?;

    info!(
        children = stats.children_scanned,
        reminders = stats.reminders_written,
        duration_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
        "Review reminders generated"
    );
    Ok(())
}
