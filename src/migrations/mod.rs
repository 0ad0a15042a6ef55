pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_configurations;
mod m20250101_000002_create_builds;
mod m20250101_000003_seed_default_configuration;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_configurations::Migration),
            Box::new(m20250101_000002_create_builds::Migration),
            Box::new(m20250101_000003_seed_default_configuration::Migration),
        ]
    }
}
