//! Build executor
//!
//! Runs a build's steps in order on its own task, streams output into the
//! build log, records step timings and the final status. Whatever happens
//! inside, the executor stops its progress broadcaster, frees the
//! scheduler's execution slot and promotes the next queued build exactly
//! once. Release and promotion happen under one scheduler lock.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::models::build::{self, BuildStatus, StepTimes};
use crate::services::broadcaster::{
    publish, start_progress_broadcaster, BroadcasterHandle, LiveProgressCell, ProgressSnapshot,
};
use crate::services::build_store::{BuildStore, BuildUpdate};
use crate::services::interpolation::interpolate;
use crate::services::runner::spawn_step;
use crate::services::scheduler::BuildScheduler;

fn seconds_since(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "build task panicked".to_string()
    }
}

/// How a single step ended
enum StepOutcome {
    Exited(i32),
    Error(AppError),
}

pub struct BuildExecutor {
    scheduler: BuildScheduler,
}

impl BuildExecutor {
    pub fn new(scheduler: BuildScheduler) -> Self {
        Self { scheduler }
    }

    fn store(&self) -> &BuildStore {
        self.scheduler.store()
    }

    /// Run the build to completion, then hand the slot to the next build
    pub async fn execute(self, build_id: i64) {
        let mut broadcaster: Option<BroadcasterHandle> = None;

        let outcome = AssertUnwindSafe(self.run(build_id, &mut broadcaster))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(status)) => info!(build_id, %status, "Build finished"),
            Ok(Err(e)) => {
                error!(build_id, error = %e, "Error in build process");
                self.record_fault(build_id, &e.to_string()).await;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(build_id, error = %message, "Build task panicked");
                self.record_fault(build_id, &message).await;
            }
        }

        if let Some(handle) = broadcaster.take() {
            handle
                .stop(self.scheduler.settings().broadcaster_grace)
                .await;
        }
        self.publish_final(build_id).await;

        if let Err(e) = self.scheduler.release_and_promote(build_id).await {
            error!(build_id, error = %e, "Failed to start next queued build");
        }
    }

    async fn run(
        &self,
        build_id: i64,
        broadcaster: &mut Option<BroadcasterHandle>,
    ) -> Result<BuildStatus> {
        let store = self.store();
        let build = store.get(build_id).await?;
        let config = self.scheduler.configurations().get(build.config_id).await?;
        let steps = config.steps();
        let total_steps = steps.len() as i32;
        let started_at = build.started_at.unwrap_or_else(Utc::now);

        let similar = store
            .find_similar(build.config_id, total_steps, build.id)
            .await?;

        let mut log = build.log.clone();
        log.push_str(&format!("Build #{} started at {}\n", build.id, started_at));
        log.push_str(&format!("Branch: {}\n", build.branch));
        log.push_str(&format!("Project path: {}\n", build.project_path));
        log.push_str(&format!(
            "Payload: {}\n\n",
            serde_json::to_string_pretty(&build.payload)?
        ));

        store
            .update(
                build_id,
                BuildUpdate {
                    status: Some(BuildStatus::Running),
                    started_at: build.started_at.is_none().then_some(started_at),
                    total_steps: Some(total_steps),
                    current_step: Some(0),
                    step_times: Some(StepTimes::default()),
                    log: Some(log.clone()),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            build_id,
            total_steps,
            similar_build = ?similar.as_ref().map(|b| b.id),
            "Build running"
        );

        let live = LiveProgressCell::new(total_steps);
        *broadcaster = Some(start_progress_broadcaster(
            store.clone(),
            self.scheduler.progress_tx().clone(),
            build_id,
            live.reader(),
            similar.clone(),
            self.scheduler.settings().progress_interval,
        ));

        let mut step_times = StepTimes::default();
        let mut success = true;

        for (index, template) in steps.iter().enumerate() {
            let offset = seconds_since(started_at, Utc::now());
            step_times.record(index, offset);
            live.begin_step(index, offset);

            let updated = store
                .update(
                    build_id,
                    BuildUpdate {
                        current_step: Some(index as i32 + 1),
                        step_times: Some(step_times.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            publish(
                self.scheduler.progress_tx(),
                ProgressSnapshot::from_build(&updated, similar.as_ref(), Utc::now()),
            );

            let command = interpolate(template, &build.payload);
            log.push_str(&format!("Executing: {}\n", command));
            self.save_log(build_id, &log).await?;
            info!(build_id, step = index + 1, %command, "Executing build step");

            match self
                .run_step(build_id, &command, &build.project_path, &mut log)
                .await
            {
                StepOutcome::Exited(0) => {
                    log.push_str("Step completed successfully\n\n");
                }
                StepOutcome::Exited(code) => {
                    warn!(build_id, step = index + 1, code, "Build step failed");
                    log.push_str(&format!("Step failed with return code {}\n", code));
                    success = false;
                    break;
                }
                StepOutcome::Error(e) => {
                    warn!(build_id, step = index + 1, error = %e, "Build step could not run");
                    log.push_str(&format!("Error executing step: {}\n", e));
                    success = false;
                    break;
                }
            }
            self.save_log(build_id, &log).await?;
        }

        let status = if success {
            BuildStatus::Success
        } else {
            BuildStatus::Failed
        };
        let completed_at = Utc::now();
        log.push_str(&format!(
            "\nBuild {} at {}\n",
            if success { "succeeded" } else { "failed" },
            completed_at
        ));

        store
            .update(
                build_id,
                BuildUpdate {
                    status: Some(status),
                    completed_at: Some(completed_at),
                    log: Some(log),
                    ..Default::default()
                },
            )
            .await?;

        Ok(status)
    }

    /// Run one step, appending its output to `log` and persisting each line
    async fn run_step(
        &self,
        build_id: i64,
        command: &str,
        project_path: &str,
        log: &mut String,
    ) -> StepOutcome {
        let shell = &self.scheduler.settings().shell;
        let mut process = match spawn_step(shell, command, Path::new(project_path)) {
            Ok(process) => process,
            Err(e) => return StepOutcome::Error(e.into()),
        };

        while let Some(line) = process.next_line().await {
            log.push_str(&line);
            if let Err(e) = self.save_log(build_id, log).await {
                return StepOutcome::Error(e);
            }
        }

        match process.wait().await {
            Ok(code) => StepOutcome::Exited(code),
            Err(e) => StepOutcome::Error(e.into()),
        }
    }

    async fn save_log(&self, build_id: i64, log: &str) -> Result<build::Model> {
        self.store()
            .update(
                build_id,
                BuildUpdate {
                    log: Some(log.to_string()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Mark the build failed after an unexpected error and keep the reason
    async fn record_fault(&self, build_id: i64, message: &str) {
        let result = self
            .store()
            .append_log(
                build_id,
                &format!("\nError in build process: {}\n", message),
                BuildUpdate {
                    status: Some(BuildStatus::Failed),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;

        if let Err(e) = result {
            error!(build_id, error = %e, "Failed to record build failure");
        }
    }

    async fn publish_final(&self, build_id: i64) {
        match self.store().find(build_id).await {
            Ok(Some(build)) => {
                let similar = self
                    .store()
                    .find_similar(build.config_id, build.total_steps, build.id)
                    .await
                    .ok()
                    .flatten();
                publish(
                    self.scheduler.progress_tx(),
                    ProgressSnapshot::from_build(&build, similar.as_ref(), Utc::now()),
                );
            }
            Ok(None) => warn!(build_id, "Finished build not found"),
            Err(e) => warn!(build_id, error = %e, "Failed to load finished build"),
        }
    }
}
