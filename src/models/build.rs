use std::collections::BTreeMap;

use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum BuildStatus {
    #[sea_orm(string_value = "queued")]
    #[serde(rename = "queued")]
    Queued,
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    #[serde(rename = "running")]
    Running,
    #[sea_orm(string_value = "success")]
    #[serde(rename = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    #[serde(rename = "failed")]
    Failed,
    #[sea_orm(string_value = "failed-permanently")]
    #[serde(rename = "failed-permanently")]
    FailedPermanently,
}

impl BuildStatus {
    /// Whether the build has reached a final outcome
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::FailedPermanently
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Queued => write!(f, "queued"),
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Running => write!(f, "running"),
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::FailedPermanently => write!(f, "failed-permanently"),
        }
    }
}

/// Offsets (seconds since build start) at which each step began, keyed by
/// zero-based step index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct StepTimes(pub BTreeMap<usize, f64>);

impl StepTimes {
    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(&index).copied()
    }

    pub fn record(&mut self, index: usize, offset_secs: f64) {
        self.0.insert(index, offset_secs);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Duration of step `index`, given the build's total elapsed time.
    ///
    /// A step ends where the next one begins; the last recorded step runs
    /// until `total_secs`.
    pub fn duration_of(&self, index: usize, total_secs: Option<f64>) -> Option<f64> {
        let start = self.get(index)?;
        let end = match self.get(index + 1) {
            Some(next) => next,
            None => total_secs?,
        };
        if end >= start {
            Some(end - start)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "builds")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub config_id: i64,
    pub status: BuildStatus,
    pub branch: String,
    pub triggered_by: String,
    pub payload: Json,
    /// Snapshot of the configuration's project path at admission time
    pub project_path: String,
    pub total_steps: i32,
    pub current_step: i32,
    #[sea_orm(column_type = "Json")]
    pub step_times: StepTimes,
    pub queue_position: Option<i32>,
    pub created_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text")]
    pub log: String,
}

impl Model {
    /// Wall-clock seconds between start and completion, if both are known
    pub fn total_elapsed_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::configuration::Entity",
        from = "Column::ConfigId",
        to = "super::configuration::Column::Id"
    )]
    Configuration,
}

impl Related<super::configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Configuration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
