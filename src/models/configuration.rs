use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Queue bound applied when a configuration does not specify one
pub const DEFAULT_MAX_QUEUE_LENGTH: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "configurations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub project_path: String,
    /// Newline-separated shell command templates
    #[sea_orm(column_type = "Text")]
    pub build_steps: String,
    pub max_queue_length: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Ordered step templates, skipping blank lines
    pub fn steps(&self) -> Vec<String> {
        parse_steps(&self.build_steps)
    }

    /// Effective admission bound (never below 1)
    pub fn queue_bound(&self) -> i32 {
        self.max_queue_length.max(1)
    }
}

/// Split a newline-separated step list into trimmed, non-empty commands
pub fn parse_steps(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::build::Entity")]
    Builds,
}

impl Related<super::build::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Builds.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps_skips_blank_lines() {
        let steps = parse_steps("echo a\n\n  \n  make build  \necho c\n");
        assert_eq!(steps, vec!["echo a", "make build", "echo c"]);
    }

    #[test]
    fn test_parse_steps_empty() {
        assert!(parse_steps("").is_empty());
        assert!(parse_steps("\n \n").is_empty());
    }
}
