//! Database migrations

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![
			Box::new(m20240601_000001_create_episodes::Migration),
			Box::new(m20240601_000002_create_export_episodes::Migration),
		]
	}
}

mod m20240601_000001_create_episodes;
mod m20240601_000002_create_export_episodes;
