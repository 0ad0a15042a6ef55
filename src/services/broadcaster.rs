//! Live build progress broadcaster
//!
//! One supervised background task per in-flight build. Every tick it reloads
//! the build, overlays the executor's live step counters, estimates progress
//! and publishes a snapshot on the progress channel. It never writes to the
//! build record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::build::{self, BuildStatus, StepTimes};
use crate::services::build_store::BuildStore;
use crate::services::estimator;
use crate::state::ProgressBroadcast;

/// Progress message sent to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub build_id: i64,
    pub status: BuildStatus,
    pub current_step: i32,
    pub total_steps: i32,
    pub percent: u8,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<f64>,
    pub overdue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<i32>,
}

impl ProgressSnapshot {
    pub fn from_build(
        build: &build::Model,
        similar: Option<&build::Model>,
        now: DateTime<Utc>,
    ) -> Self {
        let estimate = estimator::estimate(build, similar, now);
        Self {
            build_id: build.id,
            status: build.status,
            current_step: build.current_step,
            total_steps: build.total_steps,
            percent: estimate.percent,
            elapsed_seconds: estimate.elapsed_seconds,
            estimated_remaining_seconds: estimate.estimated_remaining_seconds,
            overdue: estimate.overdue,
            queue_position: build.queue_position,
        }
    }
}

/// Publish a snapshot; having no subscribers is not an error
pub fn publish(tx: &ProgressBroadcast, snapshot: ProgressSnapshot) {
    let _ = tx.send(snapshot);
}

/// Step counters as the executor sees them, possibly ahead of the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveProgress {
    pub current_step: i32,
    pub total_steps: i32,
    pub step_times: StepTimes,
}

/// Writer side of a build's live progress cell, owned by the executor
#[derive(Debug, Default)]
pub struct LiveProgressCell {
    inner: Arc<RwLock<LiveProgress>>,
}

impl LiveProgressCell {
    pub fn new(total_steps: i32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LiveProgress {
                total_steps,
                ..Default::default()
            })),
        }
    }

    /// Record the start of step `index` (zero-based) at `offset_secs` since build start
    pub fn begin_step(&self, index: usize, offset_secs: f64) {
        let mut live = self.inner.write();
        live.current_step = index as i32 + 1;
        live.step_times.record(index, offset_secs);
    }

    /// Read-only handle for the broadcaster
    pub fn reader(&self) -> LiveProgressReader {
        LiveProgressReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of a live progress cell
#[derive(Debug, Clone)]
pub struct LiveProgressReader {
    inner: Arc<RwLock<LiveProgress>>,
}

impl LiveProgressReader {
    /// Apply live counters to a persisted record when they are ahead of it
    pub fn overlay(&self, mut build: build::Model) -> build::Model {
        let live = self.inner.read();
        if live.current_step >= build.current_step {
            build.current_step = live.current_step;
            if live.step_times.len() >= build.step_times.len() {
                build.step_times = live.step_times.clone();
            }
        }
        if live.total_steps > 0 {
            build.total_steps = live.total_steps;
        }
        build
    }
}

/// How a broadcaster ended after being asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    Aborted,
}

/// Handle to a running broadcaster task
pub struct BroadcasterHandle {
    build_id: i64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BroadcasterHandle {
    /// Signal the broadcaster and wait up to `grace` for it to finish;
    /// abort it if it does not. The task is gone when this returns.
    pub async fn stop(self, grace: Duration) -> StopOutcome {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => StopOutcome::Stopped,
            Ok(Err(e)) => {
                warn!(build_id = self.build_id, error = %e, "Progress broadcaster task failed");
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(build_id = self.build_id, "Progress broadcaster did not stop in time, aborting");
                task.abort();
                let _ = task.await;
                StopOutcome::Aborted
            }
        }
    }
}

/// Start the progress broadcaster for one build
pub fn start_progress_broadcaster(
    store: BuildStore,
    tx: ProgressBroadcast,
    build_id: i64,
    live: LiveProgressReader,
    similar: Option<build::Model>,
    period: Duration,
) -> BroadcasterHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let persisted = match store.find(build_id).await {
                Ok(Some(b)) => b,
                Ok(None) => {
                    warn!(build_id, "Build disappeared, stopping progress broadcaster");
                    break;
                }
                Err(e) => {
                    warn!(build_id, error = %e, "Failed to load build for progress snapshot");
                    continue;
                }
            };

            let current = live.overlay(persisted);
            let snapshot = ProgressSnapshot::from_build(&current, similar.as_ref(), Utc::now());
            debug!(
                build_id,
                percent = snapshot.percent,
                subscribers = tx.receiver_count(),
                "Broadcasting build progress"
            );
            publish(&tx, snapshot);

            if current.status.is_terminal() {
                break;
            }
        }

        debug!(build_id, "Progress broadcaster stopped");
    });

    BroadcasterHandle {
        build_id,
        cancel,
        task,
    }
}
