//! Startup reconciliation
//!
//! A build that was pending or running when the process stopped can never
//! finish. Before the server accepts triggers these builds are marked
//! failed permanently, the surviving queue is renumbered 1..N and the head
//! of the queue is started.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::build::BuildStatus;
use crate::services::build_store::BuildUpdate;
use crate::services::scheduler::BuildScheduler;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Builds interrupted by the restart
    pub abandoned: Vec<i64>,
    /// Builds still waiting in the queue
    pub requeued: usize,
    /// Build started from the queue, if any
    pub promoted: Option<i64>,
}

/// Reconcile persisted builds with a freshly started process
pub async fn reconcile(scheduler: &BuildScheduler) -> Result<RecoveryReport> {
    let store = scheduler.store();
    let mut report = RecoveryReport::default();

    for build in store.list_in_flight().await? {
        let now = Utc::now();
        store
            .append_log(
                build.id,
                &format!(
                    "\nBuild marked as FAILED PERMANENTLY due to server restart at {}\n",
                    now
                ),
                BuildUpdate {
                    status: Some(BuildStatus::FailedPermanently),
                    completed_at: Some(now),
                    queue_position: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        warn!(build_id = build.id, previous = %build.status, "Build interrupted by restart");
        report.abandoned.push(build.id);
    }

    report.requeued = scheduler.renumber_queue().await?;

    if report.requeued > 0 {
        if let Some(build) = scheduler.promote_next().await? {
            report.promoted = Some(build.id);
            report.requeued -= 1;
        }
    }

    info!(
        abandoned = report.abandoned.len(),
        queued = report.requeued,
        promoted = ?report.promoted,
        "Build recovery completed"
    );
    Ok(report)
}
