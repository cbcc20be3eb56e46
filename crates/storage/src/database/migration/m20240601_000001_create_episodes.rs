//! Create the 30-second and 5-minute rollup tables

use sea_orm_migration::prelude::*;

const TABLES: [&str; 2] = ["episodes_30s", "episodes_5m"];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		for name in TABLES {
			let table = Alias::new(name);

			manager
				.create_table(
					Table::create()
						.table(table.clone())
						.if_not_exists()
						.col(
							ColumnDef::new(Episodes::Id)
								.integer()
								.not_null()
								.auto_increment()
								.primary_key(),
						)
						.col(ColumnDef::new(Episodes::Timeslot).big_integer().not_null())
						.col(
							ColumnDef::new(Episodes::NanoUp)
								.big_integer()
								.not_null()
								.default(0),
						)
						.col(
							ColumnDef::new(Episodes::NanoDown)
								.big_integer()
								.not_null()
								.default(0),
						)
						.col(
							ColumnDef::new(Episodes::NanoUnknown)
								.big_integer()
								.not_null()
								.default(0),
						)
						.col(
							ColumnDef::new(Episodes::NanoUnmeasured)
								.big_integer()
								.not_null()
								.default(0),
						)
						.col(ColumnDef::new(Episodes::GroupName).text().not_null())
						.col(ColumnDef::new(Episodes::ProbeName).text().not_null())
						.to_owned(),
				)
				.await?;

			manager
				.create_index(
					Index::create()
						.name(format!("idx_{name}_slot_probe_unique"))
						.table(table)
						.col(Episodes::Timeslot)
						.col(Episodes::GroupName)
						.col(Episodes::ProbeName)
						.unique()
						.if_not_exists()
						.to_owned(),
				)
				.await?;
		}

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		for name in TABLES {
			manager
				.drop_table(Table::drop().table(Alias::new(name)).to_owned())
				.await?;
		}

		Ok(())
	}
}

#[derive(DeriveIden)]
enum Episodes {
	Id,
	Timeslot,
	NanoUp,
	NanoDown,
	NanoUnknown,
	NanoUnmeasured,
	GroupName,
	ProbeName,
}
