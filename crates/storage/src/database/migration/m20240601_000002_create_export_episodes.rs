//! Create the export table holding per-destination merged episodes

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(ExportEpisodes::Table)
					.if_not_exists()
					.col(ColumnDef::new(ExportEpisodes::SyncId).text().not_null())
					.col(
						ColumnDef::new(ExportEpisodes::Timeslot)
							.big_integer()
							.not_null(),
					)
					.col(ColumnDef::new(ExportEpisodes::GroupName).text().not_null())
					.col(ColumnDef::new(ExportEpisodes::ProbeName).text().not_null())
					.col(
						ColumnDef::new(ExportEpisodes::NanoUp)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(ExportEpisodes::NanoDown)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(ExportEpisodes::NanoUnknown)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(ExportEpisodes::NanoUnmeasured)
							.big_integer()
							.not_null()
							.default(0),
					)
					.col(
						ColumnDef::new(ExportEpisodes::Origins)
							.text()
							.not_null()
							.default(""),
					)
					.col(
						ColumnDef::new(ExportEpisodes::OriginsCount)
							.integer()
							.not_null()
							.default(0),
					)
					// One row per (destination, slot, probe)
					.primary_key(
						Index::create()
							.col(ExportEpisodes::SyncId)
							.col(ExportEpisodes::Timeslot)
							.col(ExportEpisodes::GroupName)
							.col(ExportEpisodes::ProbeName),
					)
					.to_owned(),
			)
			.await?;

		// Quorum lookups filter by destination and contributor count
		manager
			.create_index(
				Index::create()
					.name("idx_export_episodes_sync_id_origins_count")
					.table(ExportEpisodes::Table)
					.col(ExportEpisodes::SyncId)
					.col(ExportEpisodes::OriginsCount)
					.if_not_exists()
					.to_owned(),
			)
			.await
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(ExportEpisodes::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum ExportEpisodes {
	Table,
	SyncId,
	Timeslot,
	GroupName,
	ProbeName,
	NanoUp,
	NanoDown,
	NanoUnknown,
	NanoUnmeasured,
	Origins,
	OriginsCount,
}
