//! Row mapping between stored columns and episode value types
//!
//! Slots are persisted as Unix seconds and durations as integer nanoseconds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::Set, FromQueryResult};

use crate::{
	episode::{Episode, ProbeRef},
	error::{Result, StorageError},
	export::ExportEntity,
	origins::OriginSet,
	rollup::{EpisodeEntity, RowId},
};

pub mod export_episode;

pub use export_episode::Entity as ExportEpisode;

/// Unix seconds of a slot
pub(crate) fn slot_to_unix(slot: DateTime<Utc>) -> i64 {
	slot.timestamp()
}

pub(crate) fn unix_to_slot(ts: i64) -> Result<DateTime<Utc>> {
	DateTime::from_timestamp(ts, 0).ok_or(StorageError::InvalidTimeSlot(ts))
}

pub(crate) fn duration_to_nanos(d: Duration) -> Result<i64> {
	i64::try_from(d.as_nanos()).map_err(|_| StorageError::InvalidDuration(d))
}

/// Negative values never get written; clamp them to zero on read
pub(crate) fn nanos_to_duration(nanos: i64) -> Duration {
	Duration::from_nanos(u64::try_from(nanos).unwrap_or_default())
}

/// The four duration counters in stored form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromQueryResult)]
pub(crate) struct Counters {
	pub nano_up: i64,
	pub nano_down: i64,
	pub nano_unknown: i64,
	pub nano_unmeasured: i64,
}

impl Counters {
	pub fn from_episode(ep: &Episode) -> Result<Self> {
		Ok(Self {
			nano_up: duration_to_nanos(ep.up)?,
			nano_down: duration_to_nanos(ep.down)?,
			nano_unknown: duration_to_nanos(ep.unknown)?,
			nano_unmeasured: duration_to_nanos(ep.no_data)?,
		})
	}

	pub fn into_episode(self, probe_ref: ProbeRef, time_slot: DateTime<Utc>) -> Episode {
		Episode {
			probe_ref,
			time_slot,
			up: nanos_to_duration(self.nano_up),
			down: nanos_to_duration(self.nano_down),
			unknown: nanos_to_duration(self.nano_unknown),
			no_data: nanos_to_duration(self.nano_unmeasured),
		}
	}
}

/// Full row of a rollup table
#[derive(Debug, Clone, FromQueryResult)]
pub(crate) struct EpisodeRow {
	pub id: i64,
	pub timeslot: i64,
	pub nano_up: i64,
	pub nano_down: i64,
	pub nano_unknown: i64,
	pub nano_unmeasured: i64,
	pub group_name: String,
	pub probe_name: String,
}

impl EpisodeRow {
	/// Column list matching the struct, for raw statements
	pub const COLUMNS: &'static str = "id, timeslot, nano_up, nano_down, nano_unknown, \
	                                   nano_unmeasured, group_name, probe_name";

	pub fn into_entity(self) -> Result<EpisodeEntity> {
		let counters = Counters {
			nano_up: self.nano_up,
			nano_down: self.nano_down,
			nano_unknown: self.nano_unknown,
			nano_unmeasured: self.nano_unmeasured,
		};

		Ok(EpisodeEntity {
			id: Some(RowId(self.id)),
			episode: counters.into_episode(
				ProbeRef::new(self.group_name, self.probe_name),
				unix_to_slot(self.timeslot)?,
			),
		})
	}
}

impl TryFrom<export_episode::Model> for ExportEntity {
	type Error = StorageError;

	fn try_from(model: export_episode::Model) -> Result<Self> {
		let counters = Counters {
			nano_up: model.nano_up,
			nano_down: model.nano_down,
			nano_unknown: model.nano_unknown,
			nano_unmeasured: model.nano_unmeasured,
		};

		Ok(Self {
			episode: counters.into_episode(
				ProbeRef::new(model.group_name, model.probe_name),
				unix_to_slot(model.timeslot)?,
			),
			sync_id: model.sync_id,
			origins: OriginSet::parse(&model.origins),
		})
	}
}

impl ExportEntity {
	/// Active model carrying every column, ready for an upsert
	pub(crate) fn to_active_model(&self) -> Result<export_episode::ActiveModel> {
		let counters = Counters::from_episode(&self.episode)?;

		Ok(export_episode::ActiveModel {
			sync_id: Set(self.sync_id.clone()),
			timeslot: Set(slot_to_unix(self.episode.time_slot)),
			group_name: Set(self.episode.probe_ref.group.clone()),
			probe_name: Set(self.episode.probe_ref.probe.clone()),
			nano_up: Set(counters.nano_up),
			nano_down: Set(counters.nano_down),
			nano_unknown: Set(counters.nano_unknown),
			nano_unmeasured: Set(counters.nano_unmeasured),
			origins: Set(self.origins.to_string()),
			origins_count: Set(i32::try_from(self.origins.size()).unwrap_or(i32::MAX)),
		})
	}
}
