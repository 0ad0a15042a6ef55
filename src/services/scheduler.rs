//! Single-flight build scheduler
//!
//! At most one build executes at a time. While a build runs, new triggers
//! are queued, bounded per configuration by `max_queue_length`; when the
//! running build finishes the globally oldest queued build is promoted,
//! regardless of its configuration.
//!
//! One async mutex guards the running build id together with all queue
//! position bookkeeping, so every admission decision, queue insertion and
//! promotion is a single critical section.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::config::builds::BuildsConfig;
use crate::db::DbConn;
use crate::error::Result;
use crate::models::build::{self, BuildStatus};
use crate::models::configuration;
use crate::services::broadcaster::ProgressSnapshot;
use crate::services::build_store::{BuildStore, BuildUpdate, NewBuild};
use crate::services::configuration::ConfigurationService;
use crate::services::executor::BuildExecutor;
use crate::state::ProgressBroadcast;

/// Capacity of the progress channel; slow observers skip old snapshots
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Execution tuning passed to every build
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub progress_interval: Duration,
    pub broadcaster_grace: Duration,
    pub shell: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(1),
            broadcaster_grace: Duration::from_secs(2),
            shell: "sh".to_string(),
        }
    }
}

impl From<&BuildsConfig> for SchedulerSettings {
    fn from(config: &BuildsConfig) -> Self {
        Self {
            progress_interval: config.progress_interval,
            broadcaster_grace: config.broadcaster_grace,
            shell: config.shell.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionOutcome {
    Started,
    Queued,
    Rejected,
}

/// Result of an admission decision
#[derive(Debug, Clone)]
pub struct Admission {
    pub outcome: AdmissionOutcome,
    /// The created build; `None` when rejected
    pub build: Option<build::Model>,
    pub message: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_triggered_by() -> String {
    "api".to_string()
}

/// A validated request to run a configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub configuration_id: i64,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub outcome: AdmissionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<i32>,
    pub message: String,
}

impl From<Admission> for TriggerResponse {
    fn from(admission: Admission) -> Self {
        Self {
            outcome: admission.outcome,
            build_id: admission.build.as_ref().map(|b| b.id),
            queue_position: admission.build.as_ref().and_then(|b| b.queue_position),
            message: admission.message,
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    running: Option<i64>,
}

struct SchedulerInner {
    store: BuildStore,
    configurations: ConfigurationService,
    state: Mutex<SchedulerState>,
    progress_tx: ProgressBroadcast,
    settings: SchedulerSettings,
}

#[derive(Clone)]
pub struct BuildScheduler {
    inner: Arc<SchedulerInner>,
}

impl BuildScheduler {
    pub fn new(db: DbConn, settings: SchedulerSettings) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(SchedulerInner {
                store: BuildStore::new(db.clone()),
                configurations: ConfigurationService::new(db),
                state: Mutex::new(SchedulerState::default()),
                progress_tx,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &BuildStore {
        &self.inner.store
    }

    pub fn configurations(&self) -> &ConfigurationService {
        &self.inner.configurations
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    pub fn progress_tx(&self) -> &ProgressBroadcast {
        &self.inner.progress_tx
    }

    /// Receive every progress snapshot published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.inner.progress_tx.subscribe()
    }

    /// Id of the build currently holding the execution slot
    pub async fn running_build(&self) -> Option<i64> {
        self.inner.state.lock().await.running
    }

    /// Resolve the configuration of a trigger request and admit it
    pub async fn trigger(&self, request: TriggerRequest) -> Result<TriggerResponse> {
        let config = self
            .inner
            .configurations
            .get(request.configuration_id)
            .await?;

        let admission = self
            .admit(
                &config,
                &request.branch,
                &request.triggered_by,
                request.payload,
            )
            .await?;

        Ok(admission.into())
    }

    /// Start a build now, queue it, or reject it when the configuration's
    /// queue is full
    pub async fn admit(
        &self,
        config: &configuration::Model,
        branch: &str,
        triggered_by: &str,
        payload: serde_json::Value,
    ) -> Result<Admission> {
        let store = &self.inner.store;
        let mut state = self.inner.state.lock().await;

        let new_build = |status, queue_position, started_at| NewBuild {
            config_id: config.id,
            status,
            branch: branch.to_string(),
            triggered_by: triggered_by.to_string(),
            payload: payload.clone(),
            project_path: config.project_path.clone(),
            total_steps: config.steps().len() as i32,
            queue_position,
            started_at,
        };

        if state.running.is_none() {
            let build = store
                .create(new_build(BuildStatus::Pending, None, Some(Utc::now())))
                .await?;
            state.running = Some(build.id);
            self.launch(build.id);

            tracing::info!(build_id = build.id, config_id = config.id, "Build started");
            return Ok(Admission {
                outcome: AdmissionOutcome::Started,
                message: format!(
                    "Build #{} started for configuration '{}'",
                    build.id, config.name
                ),
                build: Some(build),
            });
        }

        let bound = config.queue_bound();
        let queued = store.count_queued_for_config(config.id).await?;
        if queued >= bound as u64 {
            tracing::warn!(config_id = config.id, queued, bound, "Build queue full, rejecting trigger");
            return Ok(Admission {
                outcome: AdmissionOutcome::Rejected,
                build: None,
                message: format!(
                    "Queue for configuration '{}' is full (max {} queued builds)",
                    config.name, bound
                ),
            });
        }

        let position = store.max_queue_position().await?.unwrap_or(0) + 1;
        let build = store
            .create(new_build(BuildStatus::Queued, Some(position), None))
            .await?;

        tracing::info!(
            build_id = build.id,
            config_id = config.id,
            queue_position = position,
            "Build queued"
        );
        Ok(Admission {
            outcome: AdmissionOutcome::Queued,
            message: format!(
                "Build #{} queued at position {} for configuration '{}'",
                build.id, position, config.name
            ),
            build: Some(build),
        })
    }

    /// Start the head of the queue if the execution slot is free
    ///
    /// Returns the promoted build, or `None` when a build is already running
    /// or nothing is queued.
    pub async fn promote_next(&self) -> Result<Option<build::Model>> {
        let mut state = self.inner.state.lock().await;
        self.promote_locked(&mut state).await
    }

    /// Free the execution slot held by `build_id` and hand it to the head
    /// of the queue without letting another admission in between
    pub(crate) async fn release_and_promote(&self, build_id: i64) -> Result<Option<build::Model>> {
        let mut state = self.inner.state.lock().await;
        match state.running {
            Some(id) if id == build_id => state.running = None,
            other => tracing::warn!(
                build_id,
                running = ?other,
                "Released a build that does not hold the execution slot"
            ),
        }

        self.promote_locked(&mut state).await
    }

    async fn promote_locked(&self, state: &mut SchedulerState) -> Result<Option<build::Model>> {
        let store = &self.inner.store;

        if state.running.is_some() {
            return Ok(None);
        }

        let Some(next) = store.queue_head().await? else {
            return Ok(None);
        };

        let build = store
            .update(
                next.id,
                BuildUpdate {
                    status: Some(BuildStatus::Pending),
                    started_at: Some(Utc::now()),
                    queue_position: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        state.running = Some(build.id);
        self.launch(build.id);

        self.renumber_queue_locked().await?;

        tracing::info!(build_id = build.id, "Started next queued build");
        Ok(Some(build))
    }

    /// Reassign queue positions 1..N in current queue order
    pub async fn renumber_queue(&self) -> Result<usize> {
        let _state = self.inner.state.lock().await;
        self.renumber_queue_locked().await
    }

    /// Caller must hold the scheduler lock
    async fn renumber_queue_locked(&self) -> Result<usize> {
        let store = &self.inner.store;
        let queued = store.list_queued().await?;

        for (position, build) in contiguous_positions(&queued) {
            if build.queue_position != Some(position) {
                store
                    .update(
                        build.id,
                        BuildUpdate {
                            queue_position: Some(Some(position)),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        Ok(queued.len())
    }

    fn launch(&self, build_id: i64) {
        let executor = BuildExecutor::new(self.clone());
        tokio::spawn(executor.execute(build_id));
    }
}

/// Pair each queued build (already in queue order) with its contiguous position
fn contiguous_positions(queued: &[build::Model]) -> impl Iterator<Item = (i32, &build::Model)> {
    queued
        .iter()
        .enumerate()
        .map(|(index, build)| (index as i32 + 1, build))
}
