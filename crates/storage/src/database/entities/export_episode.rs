//! Export episode entity: one merged row per destination, slot and probe

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "export_episodes")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub sync_id: String,
	#[sea_orm(primary_key, auto_increment = false)]
	pub timeslot: i64,
	#[sea_orm(primary_key, auto_increment = false)]
	pub group_name: String,
	#[sea_orm(primary_key, auto_increment = false)]
	pub probe_name: String,

	pub nano_up: i64,
	pub nano_down: i64,
	pub nano_unknown: i64,
	pub nano_unmeasured: i64,

	/// Canonical [`OriginSet`](crate::OriginSet) text
	pub origins: String,
	/// Cached size of `origins`, for quorum filtering in SQL
	#[sea_orm(indexed)]
	pub origins_count: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
