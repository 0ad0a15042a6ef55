//! Durable record store for builds
//!
//! Thin query layer over the `builds` table. Every read and write the
//! scheduler, executor, broadcaster and recovery pass need goes through here.

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Unchanged};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::build::{self, BuildStatus, StepTimes};
use crate::models::prelude::*;

/// Fields of a new build record
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub config_id: i64,
    pub status: BuildStatus,
    pub branch: String,
    pub triggered_by: String,
    pub payload: serde_json::Value,
    pub project_path: String,
    pub total_steps: i32,
    pub queue_position: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Partial update of a build record; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct BuildUpdate {
    pub status: Option<BuildStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub log: Option<String>,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub step_times: Option<StepTimes>,
    /// `Some(None)` clears the queue position
    pub queue_position: Option<Option<i32>>,
}

impl BuildUpdate {
    fn into_active_model(self, id: i64) -> build::ActiveModel {
        build::ActiveModel {
            id: Unchanged(id),
            status: self.status.map(Set).unwrap_or(NotSet),
            started_at: self.started_at.map(|t| Set(Some(t))).unwrap_or(NotSet),
            completed_at: self.completed_at.map(|t| Set(Some(t))).unwrap_or(NotSet),
            log: self.log.map(Set).unwrap_or(NotSet),
            current_step: self.current_step.map(Set).unwrap_or(NotSet),
            total_steps: self.total_steps.map(Set).unwrap_or(NotSet),
            step_times: self.step_times.map(Set).unwrap_or(NotSet),
            queue_position: self.queue_position.map(Set).unwrap_or(NotSet),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct BuildStore {
    db: DbConn,
}

impl BuildStore {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewBuild) -> Result<build::Model> {
        let record = build::ActiveModel {
            config_id: Set(new.config_id),
            status: Set(new.status),
            branch: Set(new.branch),
            triggered_by: Set(new.triggered_by),
            payload: Set(new.payload),
            project_path: Set(new.project_path),
            total_steps: Set(new.total_steps),
            current_step: Set(0),
            step_times: Set(StepTimes::default()),
            queue_position: Set(new.queue_position),
            created_at: Set(Utc::now()),
            started_at: Set(new.started_at),
            completed_at: Set(None),
            log: Set(String::new()),
            ..Default::default()
        };

        Ok(record.insert(&self.db).await?)
    }

    pub async fn find(&self, id: i64) -> Result<Option<build::Model>> {
        Ok(Build::find_by_id(id).one(&self.db).await?)
    }

    /// Load a build, failing with `NotFound` if it does not exist
    pub async fn get(&self, id: i64) -> Result<build::Model> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Build {} not found", id)))
    }

    pub async fn update(&self, id: i64, update: BuildUpdate) -> Result<build::Model> {
        Ok(update.into_active_model(id).update(&self.db).await?)
    }

    /// Append `text` to the stored log and apply `update` in the same write
    pub async fn append_log(
        &self,
        id: i64,
        text: &str,
        update: BuildUpdate,
    ) -> Result<build::Model> {
        let mut log = self.get(id).await?.log;
        log.push_str(text);
        self.update(
            id,
            BuildUpdate {
                log: Some(log),
                ..update
            },
        )
        .await
    }

    /// Most recent successful build of the same configuration and step
    /// count, used as the estimation reference
    pub async fn find_similar(
        &self,
        config_id: i64,
        total_steps: i32,
        exclude_id: i64,
    ) -> Result<Option<build::Model>> {
        Ok(Build::find()
            .filter(build::Column::Status.eq(BuildStatus::Success))
            .filter(build::Column::ConfigId.eq(config_id))
            .filter(build::Column::TotalSteps.eq(total_steps))
            .filter(build::Column::Id.ne(exclude_id))
            .order_by_desc(build::Column::CompletedAt)
            .order_by_desc(build::Column::Id)
            .one(&self.db)
            .await?)
    }

    /// Builds left pending or running
    pub async fn list_in_flight(&self) -> Result<Vec<build::Model>> {
        Ok(Build::find()
            .filter(build::Column::Status.is_in([BuildStatus::Pending, BuildStatus::Running]))
            .order_by_asc(build::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// All queued builds in queue order
    pub async fn list_queued(&self) -> Result<Vec<build::Model>> {
        Ok(Build::find()
            .filter(build::Column::Status.eq(BuildStatus::Queued))
            .order_by_asc(build::Column::QueuePosition)
            .order_by_asc(build::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Queued build with the lowest queue position
    pub async fn queue_head(&self) -> Result<Option<build::Model>> {
        Ok(Build::find()
            .filter(build::Column::Status.eq(BuildStatus::Queued))
            .order_by_asc(build::Column::QueuePosition)
            .order_by_asc(build::Column::Id)
            .one(&self.db)
            .await?)
    }

    pub async fn count_queued_for_config(&self, config_id: i64) -> Result<u64> {
        Ok(Build::find()
            .filter(build::Column::Status.eq(BuildStatus::Queued))
            .filter(build::Column::ConfigId.eq(config_id))
            .count(&self.db)
            .await?)
    }

    /// Highest queue position among queued builds, if any are queued
    pub async fn max_queue_position(&self) -> Result<Option<i32>> {
        let tail = Build::find()
            .filter(build::Column::Status.eq(BuildStatus::Queued))
            .filter(build::Column::QueuePosition.is_not_null())
            .order_by_desc(build::Column::QueuePosition)
            .one(&self.db)
            .await?;

        Ok(tail.and_then(|b| b.queue_position))
    }

    /// Newest builds first
    pub async fn list_recent(&self, limit: u64) -> Result<Vec<build::Model>> {
        Ok(Build::find()
            .order_by_desc(build::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }
}
