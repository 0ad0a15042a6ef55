//! Build configuration management
//!
//! Configurations are the recipes builds are triggered from. The scheduler
//! only reads them; creation, edits and deletion happen here.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};

use crate::db::DbConn;
use crate::error::{AppError, Result};
use crate::models::configuration::{self, DEFAULT_MAX_QUEUE_LENGTH};
use crate::models::prelude::*;

/// Fields of a new configuration
#[derive(Debug, Clone)]
pub struct NewConfiguration {
    pub name: String,
    pub project_path: String,
    pub build_steps: Vec<String>,
    pub max_queue_length: Option<i32>,
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct ConfigurationUpdate {
    pub name: Option<String>,
    pub project_path: Option<String>,
    pub build_steps: Option<Vec<String>>,
    pub max_queue_length: Option<i32>,
}

fn new_api_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct ConfigurationService {
    db: DbConn,
}

impl ConfigurationService {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewConfiguration) -> Result<configuration::Model> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest(
                "Configuration name must not be empty".to_string(),
            ));
        }
        self.ensure_name_available(&name, None).await?;

        let now = Utc::now();
        let record = configuration::ActiveModel {
            name: Set(name),
            api_token: Set(new_api_token()),
            project_path: Set(new.project_path),
            build_steps: Set(new.build_steps.join("\n")),
            max_queue_length: Set(new
                .max_queue_length
                .unwrap_or(DEFAULT_MAX_QUEUE_LENGTH)
                .max(1)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let created = record.insert(&self.db).await?;
        tracing::info!(config_id = created.id, name = %created.name, "Configuration created");
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<configuration::Model> {
        Configuration::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Configuration {} not found", id)))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<configuration::Model>> {
        Ok(Configuration::find()
            .filter(configuration::Column::Name.eq(name))
            .one(&self.db)
            .await?)
    }

    pub async fn list(&self) -> Result<Vec<configuration::Model>> {
        Ok(Configuration::find()
            .order_by_asc(configuration::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn update(
        &self,
        id: i64,
        update: ConfigurationUpdate,
    ) -> Result<configuration::Model> {
        let existing = self.get(id).await?;
        let mut active: configuration::ActiveModel = existing.into();

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::BadRequest(
                    "Configuration name must not be empty".to_string(),
                ));
            }
            self.ensure_name_available(&name, Some(id)).await?;
            active.name = Set(name);
        }
        if let Some(path) = update.project_path {
            active.project_path = Set(path);
        }
        if let Some(steps) = update.build_steps {
            active.build_steps = Set(steps.join("\n"));
        }
        if let Some(max) = update.max_queue_length {
            active.max_queue_length = Set(max.max(1));
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&self.db).await?)
    }

    pub async fn regenerate_token(&self, id: i64) -> Result<configuration::Model> {
        let existing = self.get(id).await?;
        let mut active: configuration::ActiveModel = existing.into();
        active.api_token = Set(new_api_token());
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.db).await?)
    }

    /// Delete a configuration
    ///
    /// The last remaining configuration can never be deleted. Builds that
    /// reference the configuration must be moved to `reassign_to` first.
    /// Returns the number of reassigned builds.
    pub async fn delete(&self, id: i64, reassign_to: Option<i64>) -> Result<u64> {
        let config = self.get(id).await?;

        if Configuration::find().count(&self.db).await? <= 1 {
            return Err(AppError::Conflict(
                "Cannot delete the last remaining configuration".to_string(),
            ));
        }

        let referencing = Build::find()
            .filter(build::Column::ConfigId.eq(id))
            .count(&self.db)
            .await?;

        let mut reassigned = 0;
        if referencing > 0 {
            let target = match reassign_to {
                Some(target) if target == id => {
                    return Err(AppError::BadRequest(
                        "Builds cannot be reassigned to the configuration being deleted"
                            .to_string(),
                    ))
                }
                Some(target) => self.get(target).await?,
                None => {
                    return Err(AppError::Conflict(format!(
                        "Configuration '{}' has {} builds; reassign them before deleting",
                        config.name, referencing
                    )))
                }
            };

            reassigned = Build::update_many()
                .col_expr(build::Column::ConfigId, Expr::value(target.id))
                .filter(build::Column::ConfigId.eq(id))
                .exec(&self.db)
                .await?
                .rows_affected;
        }

        Configuration::delete_by_id(id).exec(&self.db).await?;
        tracing::info!(config_id = id, reassigned, "Configuration deleted");

        Ok(reassigned)
    }

    async fn ensure_name_available(&self, name: &str, except: Option<i64>) -> Result<()> {
        match self.find_by_name(name).await? {
            Some(existing) if Some(existing.id) != except => Err(AppError::Conflict(format!(
                "Configuration '{}' already exists",
                name
            ))),
            _ => Ok(()),
        }
    }
}
