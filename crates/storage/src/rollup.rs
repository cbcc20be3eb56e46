//! Episode rollup tables, one per granularity
//!
//! Rows are keyed by `(timeslot, group_name, probe_name)` and carry four
//! duration counters. The scheduler inserts them, may overwrite their counters
//! by row id, and the retention sweeper trims old slots.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use sea_orm::{
	ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, QueryResult, Statement,
	Value,
};
use tracing::{debug, instrument, trace};

use crate::{
	database::entities::{slot_to_unix, unix_to_slot, Counters, EpisodeRow},
	episode::{Episode, ProbeRef, Range, StepRange},
	error::{QueryContext, Result, StorageError},
};

/// Bucket size of a rollup table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
	/// 30 second buckets
	Fine,
	/// 5 minute buckets
	Coarse,
}

impl Granularity {
	pub const ALL: [Self; 2] = [Self::Fine, Self::Coarse];

	#[must_use]
	pub const fn table(self) -> &'static str {
		match self {
			Self::Fine => "episodes_30s",
			Self::Coarse => "episodes_5m",
		}
	}

	#[must_use]
	pub const fn slot_size(self) -> Duration {
		match self {
			Self::Fine => Duration::from_secs(30),
			Self::Coarse => Duration::from_secs(300),
		}
	}

	/// Start of the bucket containing `ts`
	#[must_use]
	pub fn align(self, ts: DateTime<Utc>) -> DateTime<Utc> {
		#[allow(clippy::cast_possible_wrap)]
		// SAFETY: both slot sizes are tiny constants
		let step = self.slot_size().as_secs() as i64;
		let secs = ts.timestamp();

		DateTime::from_timestamp(secs - secs.rem_euclid(step), 0).unwrap_or(ts)
	}
}

impl fmt::Display for Granularity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.table())
	}
}

/// Storage-assigned row identity, only good for [`EpisodeStore::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub i64);

impl fmt::Display for RowId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Stored episode together with its row identity.
///
/// Lookups of absent keys return an entity without identity instead of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeEntity {
	pub id: Option<RowId>,
	pub episode: Episode,
}

impl EpisodeEntity {
	fn missing(slot: DateTime<Utc>, probe_ref: &ProbeRef) -> Self {
		Self {
			id: None,
			episode: Episode::new(probe_ref.clone(), slot),
		}
	}

	#[must_use]
	pub const fn exists(&self) -> bool {
		self.id.is_some()
	}
}

/// Shape of a range summation query.
///
/// Each variant reads back a different set of key columns: none, the group, or
/// the group and the probe. A concrete group narrows both the filter and the
/// grouping; the wildcard probe only widens the grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumGrouping<'a> {
	/// Everything in the range summed into one episode
	Total,
	/// One episode for the group
	ByGroup { group: &'a str },
	/// One episode per probe of the group; `None` means every probe
	ByGroupAndProbe {
		group: &'a str,
		probe: Option<&'a str>,
	},
}

impl<'a> SumGrouping<'a> {
	/// An empty group sums everything, an empty probe sums the group and
	/// [`TOTAL_PROBE_NAME`](crate::TOTAL_PROBE_NAME) lists every probe of the group.
	#[must_use]
	pub fn for_ref(probe_ref: &'a ProbeRef) -> Self {
		if probe_ref.group.is_empty() {
			Self::Total
		} else if probe_ref.probe.is_empty() {
			Self::ByGroup {
				group: &probe_ref.group,
			}
		} else {
			Self::ByGroupAndProbe {
				group: &probe_ref.group,
				probe: (!probe_ref.is_wildcard_probe()).then_some(probe_ref.probe.as_str()),
			}
		}
	}

	fn statement(&self, table: &str, range: Range) -> Statement {
		const SUMS: &str = "COUNT(*) AS n, \
		                    COALESCE(SUM(nano_up), 0) AS nano_up, \
		                    COALESCE(SUM(nano_down), 0) AS nano_down, \
		                    COALESCE(SUM(nano_unknown), 0) AS nano_unknown, \
		                    COALESCE(SUM(nano_unmeasured), 0) AS nano_unmeasured";

		let mut values: Vec<Value> = vec![range.from.into(), range.to.into()];

		let sql = match *self {
			Self::Total => format!(
				"SELECT {SUMS} FROM {table} \
				 WHERE timeslot >= ? AND timeslot < ?"
			),
			Self::ByGroup { group } => {
				values.push(group.into());
				format!(
					"SELECT group_name, {SUMS} FROM {table} \
					 WHERE timeslot >= ? AND timeslot < ? AND group_name = ? \
					 GROUP BY group_name"
				)
			}
			Self::ByGroupAndProbe { group, probe } => {
				values.push(group.into());
				let probe_filter = probe.map_or("", |probe| {
					values.push(probe.into());
					" AND probe_name = ?"
				});
				format!(
					"SELECT group_name, probe_name, {SUMS} FROM {table} \
					 WHERE timeslot >= ? AND timeslot < ? AND group_name = ?{probe_filter} \
					 GROUP BY group_name, probe_name \
					 ORDER BY probe_name"
				)
			}
		};

		Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
	}

	/// Turns one result row into an episode stamped with the range start.
	/// Rows that summed nothing yield `None`.
	fn read(
		&self,
		row: &QueryResult,
		range: Range,
	) -> std::result::Result<Option<Episode>, sea_orm::DbErr> {
		let n: i64 = row.try_get("", "n")?;
		if n == 0 {
			return Ok(None);
		}

		let probe_ref = match self {
			Self::Total => ProbeRef::default(),
			Self::ByGroup { .. } => ProbeRef::new(row.try_get::<String>("", "group_name")?, ""),
			Self::ByGroupAndProbe { .. } => ProbeRef::new(
				row.try_get::<String>("", "group_name")?,
				row.try_get::<String>("", "probe_name")?,
			),
		};

		let counters = Counters::from_query_result(row, "")?;
		let slot = DateTime::from_timestamp(range.from, 0).ok_or_else(|| {
			sea_orm::DbErr::Custom(format!("range start {} out of range", range.from))
		})?;

		Ok(Some(counters.into_episode(probe_ref, slot)))
	}
}

/// Rollup store over one granularity table
#[derive(Debug, Clone)]
pub struct EpisodeStore {
	conn: DatabaseConnection,
	granularity: Granularity,
}

impl EpisodeStore {
	#[must_use]
	pub fn new(conn: DatabaseConnection, granularity: Granularity) -> Self {
		Self { conn, granularity }
	}

	#[must_use]
	pub fn fine(conn: DatabaseConnection) -> Self {
		Self::new(conn, Granularity::Fine)
	}

	#[must_use]
	pub fn coarse(conn: DatabaseConnection) -> Self {
		Self::new(conn, Granularity::Coarse)
	}

	#[must_use]
	pub const fn granularity(&self) -> Granularity {
		self.granularity
	}

	const fn table(&self) -> &'static str {
		self.granularity.table()
	}

	async fn select_rows(
		&self,
		op: &'static str,
		context: impl FnOnce() -> String,
		where_sql: &str,
		values: Vec<Value>,
	) -> Result<Vec<EpisodeEntity>> {
		let rows = EpisodeRow::find_by_statement(Statement::from_sql_and_values(
			DbBackend::Sqlite,
			format!(
				"SELECT {} FROM {} WHERE {where_sql}",
				EpisodeRow::COLUMNS,
				self.table()
			),
			values,
		))
		.all(&self.conn)
		.await
		.query_context(op, context)?;

		rows.into_iter().map(EpisodeRow::into_entity).collect()
	}

	/// Single row by exact key, or an identity-less entity when absent
	#[instrument(skip(self), fields(table = %self.granularity), err)]
	pub async fn get_by_slot_and_probe(
		&self,
		slot: DateTime<Utc>,
		probe_ref: &ProbeRef,
	) -> Result<EpisodeEntity> {
		let mut found = self
			.select_rows(
				"get_by_slot_and_probe",
				|| format!("slot={} ref={probe_ref}", slot.timestamp()),
				"timeslot = ? AND group_name = ? AND probe_name = ? LIMIT 1",
				vec![
					slot_to_unix(slot).into(),
					probe_ref.group.as_str().into(),
					probe_ref.probe.as_str().into(),
				],
			)
			.await?;

		Ok(found
			.pop()
			.unwrap_or_else(|| EpisodeEntity::missing(slot, probe_ref)))
	}

	/// Rows of one probe with slots in `[start, end)`, oldest first
	#[instrument(skip(self), fields(table = %self.granularity), err)]
	pub async fn list_by_range(
		&self,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		probe_ref: &ProbeRef,
	) -> Result<Vec<EpisodeEntity>> {
		self.select_rows(
			"list_by_range",
			|| {
				format!(
					"start={} end={} ref={probe_ref}",
					start.timestamp(),
					end.timestamp()
				)
			},
			"timeslot >= ? AND timeslot < ? AND group_name = ? AND probe_name = ? \
			 ORDER BY timeslot",
			vec![
				slot_to_unix(start).into(),
				slot_to_unix(end).into(),
				probe_ref.group.as_str().into(),
				probe_ref.probe.as_str().into(),
			],
		)
		.await
	}

	/// Every row of the slot across all groups and probes
	#[instrument(skip(self), fields(table = %self.granularity), err)]
	pub async fn list_by_slot(&self, slot: DateTime<Utc>) -> Result<Vec<EpisodeEntity>> {
		self.select_rows(
			"list_by_slot",
			|| format!("slot={}", slot.timestamp()),
			"timeslot = ? ORDER BY group_name, probe_name",
			vec![slot_to_unix(slot).into()],
		)
		.await
	}

	pub async fn list_episodes_by_slot(&self, slot: DateTime<Utc>) -> Result<Vec<Episode>> {
		Ok(self
			.list_by_slot(slot)
			.await?
			.into_iter()
			.map(|entity| entity.episode)
			.collect())
	}

	/// Unconditional insert; a duplicate key fails on the unique index
	#[instrument(
		skip(self, episode),
		fields(table = %self.granularity, slot = episode.time_slot.timestamp(), probe = %episode.probe_ref),
		err
	)]
	pub async fn insert(&self, episode: &Episode) -> Result<RowId> {
		let counters = Counters::from_episode(episode)?;

		let res = self
			.conn
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"INSERT INTO {} \
					 (timeslot, nano_up, nano_down, nano_unknown, nano_unmeasured, group_name, probe_name) \
					 VALUES (?, ?, ?, ?, ?, ?, ?)",
					self.table()
				),
				vec![
					slot_to_unix(episode.time_slot).into(),
					counters.nano_up.into(),
					counters.nano_down.into(),
					counters.nano_unknown.into(),
					counters.nano_unmeasured.into(),
					episode.probe_ref.group.as_str().into(),
					episode.probe_ref.probe.as_str().into(),
				],
			))
			.await
			.query_context("insert", || {
				format!(
					"slot={} ref={}",
					episode.time_slot.timestamp(),
					episode.probe_ref
				)
			})?;

		#[allow(clippy::cast_possible_wrap)]
		// SAFETY: SQLite rowids are i64 to begin with
		let id = RowId(res.last_insert_id() as i64);
		trace!(%id, "Inserted episode");

		Ok(id)
	}

	/// Inserts one by one and stops at the first failure.
	///
	/// Not atomic: rows inserted before the failing item stay in place. Callers
	/// re-submitting a partially stored batch get unique key errors for the
	/// stored part.
	#[instrument(skip_all, fields(table = %self.granularity, count = episodes.len()), err)]
	pub async fn save_batch(&self, episodes: &[Episode]) -> Result<()> {
		for (index, episode) in episodes.iter().enumerate() {
			self.insert(episode)
				.await
				.map_err(|e| StorageError::BatchItem {
					index,
					source: Box::new(e),
				})?;
		}

		Ok(())
	}

	/// Overwrites the four counters of the row, key columns are left alone
	#[instrument(skip(self, episode), fields(table = %self.granularity), err)]
	pub async fn update(&self, id: RowId, episode: &Episode) -> Result<()> {
		let counters = Counters::from_episode(episode)?;

		let res = self
			.conn
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"UPDATE {} \
					 SET nano_up = ?, nano_down = ?, nano_unknown = ?, nano_unmeasured = ? \
					 WHERE id = ?",
					self.table()
				),
				vec![
					counters.nano_up.into(),
					counters.nano_down.into(),
					counters.nano_unknown.into(),
					counters.nano_unmeasured.into(),
					id.0.into(),
				],
			))
			.await
			.query_context("update", || format!("id={id}"))?;

		if res.rows_affected() == 0 {
			debug!(%id, "Update matched no rows");
		}

		Ok(())
	}

	/// Deletes every row with `timeslot <= slot`
	#[instrument(skip(self), fields(table = %self.granularity), err)]
	pub async fn delete_up_to(&self, slot: DateTime<Utc>) -> Result<u64> {
		let res = self
			.conn
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!("DELETE FROM {} WHERE timeslot <= ?", self.table()),
				vec![slot_to_unix(slot).into()],
			))
			.await
			.query_context("delete_up_to", || format!("slot={}", slot.timestamp()))?;

		debug!(deleted = res.rows_affected(), "Trimmed episodes");

		Ok(res.rows_affected())
	}

	/// Oldest stored slot, or the Unix epoch for an empty table
	#[instrument(skip(self), fields(table = %self.granularity), err)]
	pub async fn get_earliest_time_slot(&self) -> Result<DateTime<Utc>> {
		let row = self
			.conn
			.query_one(Statement::from_string(
				DbBackend::Sqlite,
				format!("SELECT MIN(timeslot) AS slot FROM {}", self.table()),
			))
			.await
			.query_context("get_earliest_time_slot", String::new)?;

		let slot = row
			.map(|row| row.try_get::<Option<i64>>("", "slot"))
			.transpose()
			.query_context("get_earliest_time_slot", String::new)?
			.flatten();

		slot.map_or(Ok(DateTime::UNIX_EPOCH), unix_to_slot)
	}

	/// Row count per slot, as `"<unix slot> <count>"` lines
	#[instrument(skip(self), fields(table = %self.granularity), err)]
	pub async fn stats(&self) -> Result<Vec<String>> {
		let rows = self
			.conn
			.query_all(Statement::from_string(
				DbBackend::Sqlite,
				format!(
					"SELECT timeslot, COUNT(*) AS n FROM {} GROUP BY timeslot ORDER BY timeslot",
					self.table()
				),
			))
			.await
			.query_context("stats", String::new)?;

		rows.iter()
			.map(|row| -> std::result::Result<String, sea_orm::DbErr> {
				let slot: i64 = row.try_get("", "timeslot")?;
				let count: i64 = row.try_get("", "n")?;
				Ok(format!("{slot} {count}"))
			})
			.collect::<std::result::Result<Vec<_>, _>>()
			.query_context("stats", String::new)
	}

	/// Sums counters over each subrange, grouped according to
	/// [`SumGrouping::for_ref`]. Subranges without rows produce nothing.
	#[instrument(
		skip(self, step_range),
		fields(table = %self.granularity, ranges = step_range.subranges.len()),
		err
	)]
	pub async fn list_episode_sums_for_ranges(
		&self,
		step_range: &StepRange,
		probe_ref: &ProbeRef,
	) -> Result<Vec<Episode>> {
		let grouping = SumGrouping::for_ref(probe_ref);
		let mut episodes = Vec::new();

		for &range in &step_range.subranges {
			let context = || format!("from={} to={} ref={probe_ref}", range.from, range.to);

			let rows = self
				.conn
				.query_all(grouping.statement(self.table(), range))
				.await
				.query_context("list_episode_sums_for_ranges", context)?;

			for row in &rows {
				if let Some(episode) = grouping
					.read(row, range)
					.query_context("list_episode_sums_for_ranges", context)?
				{
					episodes.push(episode);
				}
			}
		}

		Ok(episodes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	use crate::TOTAL_PROBE_NAME;

	fn ts(secs: i64) -> DateTime<Utc> {
		DateTime::from_timestamp(secs, 0).unwrap()
	}

	#[test]
	fn align_truncates_to_bucket_start() {
		assert_eq!(Granularity::Fine.align(ts(359)), ts(330));
		assert_eq!(Granularity::Coarse.align(ts(359)), ts(300));
		assert_eq!(Granularity::Coarse.align(ts(300)), ts(300));
	}

	#[test]
	fn grouping_follows_probe_ref_shape() {
		let total = ProbeRef::new("", "whatever");
		let group = ProbeRef::new("nginx", "");
		let wildcard = ProbeRef::new("nginx", TOTAL_PROBE_NAME);
		let exact = ProbeRef::new("nginx", "main");

		assert_eq!(SumGrouping::for_ref(&total), SumGrouping::Total);
		assert_eq!(
			SumGrouping::for_ref(&group),
			SumGrouping::ByGroup { group: "nginx" }
		);
		assert_eq!(
			SumGrouping::for_ref(&wildcard),
			SumGrouping::ByGroupAndProbe {
				group: "nginx",
				probe: None
			}
		);
		assert_eq!(
			SumGrouping::for_ref(&exact),
			SumGrouping::ByGroupAndProbe {
				group: "nginx",
				probe: Some("main")
			}
		);
	}

	#[test]
	fn wildcard_probe_never_filters_rows() {
		let range = Range::new(0, 300);

		let wildcard = SumGrouping::ByGroupAndProbe {
			group: "nginx",
			probe: None,
		}
		.statement("episodes_5m", range);
		assert!(!wildcard.sql.contains("probe_name = ?"), "{}", wildcard.sql);
		assert!(wildcard.sql.contains("GROUP BY group_name, probe_name"));
		assert_eq!(wildcard.values.map(|v| v.0.len()), Some(3));

		let exact = SumGrouping::ByGroupAndProbe {
			group: "nginx",
			probe: Some("main"),
		}
		.statement("episodes_5m", range);
		assert!(exact.sql.contains("AND probe_name = ?"));
		assert_eq!(exact.values.map(|v| v.0.len()), Some(4));
	}

	#[test]
	fn group_narrows_filter_and_grouping() {
		let stmt =
			SumGrouping::ByGroup { group: "nginx" }.statement("episodes_30s", Range::new(0, 30));

		assert!(stmt.sql.starts_with("SELECT group_name, COUNT(*)"));
		assert!(stmt.sql.contains("AND group_name = ?"));
		assert!(stmt.sql.contains("GROUP BY group_name"));
		assert!(!stmt.sql.contains("probe_name"));

		let total = SumGrouping::Total.statement("episodes_30s", Range::new(0, 30));
		assert!(!total.sql.contains("GROUP BY"));
		assert!(!total.sql.contains("group_name"));
	}
}
