//! Export store: per-destination merged episodes waiting to be shipped
//!
//! Several agents submit the same `(slot, group, probe)` bucket for a
//! destination. Rows are merged on save (union of origins, last write wins for
//! counters) and handed out one slot at a time, oldest first. The shipper
//! acknowledges delivery with [`ExportStore::delete_up_to`].

use std::{
	collections::{BTreeSet, HashMap},
	sync::Arc,
};

use chrono::{DateTime, Utc};
use sea_orm::{
	sea_query::OnConflict, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
	PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, TransactionTrait,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, trace};

use crate::{
	config::ExportConfig,
	database::entities::{export_episode, slot_to_unix, ExportEpisode},
	episode::Episode,
	error::{QueryContext, Result, StorageError},
	origins::OriginSet,
};

/// Episode prepared for a destination, with the agents that reported it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportEntity {
	pub episode: Episode,
	pub sync_id: String,
	pub origins: OriginSet,
}

impl ExportEntity {
	pub fn new(episode: Episode, sync_id: impl Into<String>) -> Self {
		Self {
			episode,
			sync_id: sync_id.into(),
			origins: OriginSet::new(),
		}
	}

	pub fn add_origin(&mut self, origin: impl Into<String>) {
		self.origins.add(origin);
	}
}

type WriterLocks = Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Export store over the `export_episodes` table.
///
/// Saves are read-merge-write inside one transaction. Clones of a store share
/// per-destination writer locks, so saves issued through them never race each
/// other. A lock lives only while some save holds or awaits it.
///
/// Separate `ExportStore::new` instances do not share locks, and neither do
/// writers in other processes. Those must not save for the same destination
/// concurrently: their transactions fail with a busy database or overwrite
/// each other's merged origins.
#[derive(Debug, Clone)]
pub struct ExportStore {
	conn: DatabaseConnection,
	config: ExportConfig,
	writers: WriterLocks,
}

impl ExportStore {
	pub fn new(conn: DatabaseConnection, config: ExportConfig) -> Self {
		Self {
			conn,
			config,
			writers: Arc::default(),
		}
	}

	/// Locks are taken in sorted order so overlapping batches cannot deadlock.
	async fn lock_destinations(&self, sync_ids: &BTreeSet<&str>) -> Vec<OwnedMutexGuard<()>> {
		let locks = {
			let mut writers = self.writers.lock().await;
			sync_ids
				.iter()
				.map(|id| Arc::clone(writers.entry((*id).to_string()).or_default()))
				.collect::<Vec<_>>()
		};

		let mut guards = Vec::with_capacity(locks.len());
		for lock in locks {
			guards.push(lock.lock_owned().await);
		}
		guards
	}

	/// Drops locks that no save holds or waits for
	async fn prune_writers(&self) {
		self.writers
			.lock()
			.await
			.retain(|_, lock| Arc::strong_count(lock) > 1);
	}

	/// Merges every entity into its stored row, all or nothing.
	///
	/// Origins of an existing row are unioned with the new ones while the four
	/// counters are replaced by the new entity's values.
	#[instrument(skip_all, fields(count = entities.len()), err)]
	pub async fn save(&self, entities: &[ExportEntity]) -> Result<()> {
		if entities.is_empty() {
			return Ok(());
		}

		let sync_ids = entities
			.iter()
			.map(|entity| entity.sync_id.as_str())
			.collect::<BTreeSet<_>>();

		let guards = self.lock_destinations(&sync_ids).await;
		let res = self.save_locked(entities, &sync_ids).await;
		drop(guards);
		self.prune_writers().await;

		res
	}

	async fn save_locked(
		&self,
		entities: &[ExportEntity],
		sync_ids: &BTreeSet<&str>,
	) -> Result<()> {
		let txn = self
			.conn
			.begin()
			.await
			.query_context("save", || format!("sync_ids={sync_ids:?}"))?;

		for entity in entities {
			// Dropping the transaction on error rolls it back
			merge_one(&txn, entity).await?;
		}

		txn.commit()
			.await
			.query_context("save", || format!("sync_ids={sync_ids:?}"))?;

		debug!(destinations = sync_ids.len(), "Saved export episodes");

		Ok(())
	}

	/// All rows of the earliest deliverable slot for the destination
	pub async fn get_earliest_episodes(
		&self,
		sync_id: &str,
		desired_origins_count: usize,
	) -> Result<Vec<ExportEntity>> {
		self.get_earliest_episodes_at(sync_id, desired_origins_count, Utc::now())
			.await
	}

	/// Same as [`get_earliest_episodes`](Self::get_earliest_episodes), judged
	/// against the given instant.
	///
	/// The oldest slot wins once it lies before `now` (minus the configured
	/// grace). A slot that is not in the past yet is only handed out when some
	/// row of the destination has reached `desired_origins_count` origins.
	/// Fails with [`StorageError::NotFound`] both when there is no data and when
	/// nothing is deliverable yet.
	#[instrument(skip(self, now), fields(now = now.timestamp()), err)]
	pub async fn get_earliest_episodes_at(
		&self,
		sync_id: &str,
		desired_origins_count: usize,
		now: DateTime<Utc>,
	) -> Result<Vec<ExportEntity>> {
		let slot = self
			.earliest_deliverable_slot(sync_id, desired_origins_count, now)
			.await?;

		let models = ExportEpisode::find()
			.filter(export_episode::Column::SyncId.eq(sync_id))
			.filter(export_episode::Column::Timeslot.eq(slot))
			.order_by_asc(export_episode::Column::GroupName)
			.order_by_asc(export_episode::Column::ProbeName)
			.all(&self.conn)
			.await
			.query_context("get_earliest_episodes", || {
				format!("sync_id={sync_id} slot={slot}")
			})?;

		trace!(slot, rows = models.len(), "Selected earliest export slot");

		models.into_iter().map(ExportEntity::try_from).collect()
	}

	async fn earliest_deliverable_slot(
		&self,
		sync_id: &str,
		desired_origins_count: usize,
		now: DateTime<Utc>,
	) -> Result<i64> {
		let common_slot = self
			.min_slot(sync_id, None)
			.await?
			.ok_or(StorageError::NotFound)?;

		let grace = i64::try_from(self.config.delivery_grace_secs).unwrap_or(i64::MAX);
		if common_slot < now.timestamp().saturating_sub(grace) {
			return Ok(common_slot);
		}

		let fulfilled_slot = if desired_origins_count > 1 {
			self.min_slot(sync_id, Some(desired_origins_count))
				.await?
				.ok_or(StorageError::NotFound)?
		} else {
			common_slot
		};

		Ok(fulfilled_slot.min(common_slot))
	}

	/// Minimal slot of the destination, optionally among rows with at least
	/// `min_origins` contributors
	async fn min_slot(&self, sync_id: &str, min_origins: Option<usize>) -> Result<Option<i64>> {
		let slot = ExportEpisode::find()
			.select_only()
			.column_as(export_episode::Column::Timeslot.min(), "slot")
			.filter(export_episode::Column::SyncId.eq(sync_id))
			.apply_if(min_origins, |query, count| {
				query.filter(
					export_episode::Column::OriginsCount.gte(i32::try_from(count).unwrap_or(i32::MAX)),
				)
			})
			.into_tuple::<Option<i64>>()
			.one(&self.conn)
			.await
			.query_context("min_slot", || {
				format!("sync_id={sync_id} min_origins={min_origins:?}")
			})?;

		Ok(slot.flatten())
	}

	/// Acknowledges delivery: drops the destination's rows with `timeslot <= slot`.
	///
	/// No tombstone is kept, saving the same data again recreates the rows.
	#[instrument(skip(self), err)]
	pub async fn delete_up_to(&self, sync_id: &str, slot: DateTime<Utc>) -> Result<u64> {
		let res = ExportEpisode::delete_many()
			.filter(export_episode::Column::SyncId.eq(sync_id))
			.filter(export_episode::Column::Timeslot.lte(slot_to_unix(slot)))
			.exec(&self.conn)
			.await
			.query_context("delete_up_to", || {
				format!("sync_id={sync_id} slot={}", slot.timestamp())
			})?;

		debug!(deleted = res.rows_affected, "Trimmed export episodes");

		Ok(res.rows_affected)
	}

	/// Number of stored rows for the destination
	pub async fn count(&self, sync_id: &str) -> Result<u64> {
		ExportEpisode::find()
			.filter(export_episode::Column::SyncId.eq(sync_id))
			.count(&self.conn)
			.await
			.query_context("count", || format!("sync_id={sync_id}"))
	}
}

async fn merge_one(txn: &DatabaseTransaction, entity: &ExportEntity) -> Result<()> {
	let slot = slot_to_unix(entity.episode.time_slot);
	let probe_ref = &entity.episode.probe_ref;
	let context = || format!("sync_id={} slot={slot} ref={probe_ref}", entity.sync_id);

	let existing = ExportEpisode::find_by_id((
		entity.sync_id.clone(),
		slot,
		probe_ref.group.clone(),
		probe_ref.probe.clone(),
	))
	.one(txn)
	.await
	.query_context("save", context)?;

	let mut merged = entity.clone();
	if let Some(stored) = existing {
		merged.origins.merge(&OriginSet::parse(&stored.origins));
		trace!(
			stored = %stored.origins,
			merged = %merged.origins,
			"Merging export episode origins"
		);
	}

	ExportEpisode::insert(merged.to_active_model()?)
		.on_conflict(
			OnConflict::columns([
				export_episode::Column::SyncId,
				export_episode::Column::Timeslot,
				export_episode::Column::GroupName,
				export_episode::Column::ProbeName,
			])
			.update_columns([
				export_episode::Column::NanoUp,
				export_episode::Column::NanoDown,
				export_episode::Column::NanoUnknown,
				export_episode::Column::NanoUnmeasured,
				export_episode::Column::Origins,
				export_episode::Column::OriginsCount,
			])
			.to_owned(),
		)
		.exec_without_returning(txn)
		.await
		.query_context("save", context)?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::time::Duration;

	use tokio::time::timeout;

	use crate::{Database, ProbeRef};

	fn one(sync_id: &str) -> BTreeSet<&str> {
		BTreeSet::from([sync_id])
	}

	#[tokio::test]
	async fn clones_share_writer_locks() {
		let db = Database::memory().await.unwrap();
		let store = ExportStore::new(db.conn().clone(), ExportConfig::default());
		let clone = store.clone();
		let separate = ExportStore::new(db.conn().clone(), ExportConfig::default());

		let _held = store.lock_destinations(&one("dest")).await;

		assert!(
			timeout(Duration::from_millis(50), clone.lock_destinations(&one("dest")))
				.await
				.is_err()
		);
		// Other destinations are not blocked
		assert_eq!(clone.lock_destinations(&one("other")).await.len(), 1);
		// Nothing is shared with an independent store
		assert_eq!(
			timeout(Duration::from_millis(50), separate.lock_destinations(&one("dest")))
				.await
				.unwrap()
				.len(),
			1
		);
	}

	#[tokio::test]
	async fn writer_locks_are_released_after_save() {
		let db = Database::memory().await.unwrap();
		let store = ExportStore::new(db.conn().clone(), ExportConfig::default());

		let mut entity = ExportEntity::new(
			Episode::new(ProbeRef::new("nginx", "main"), DateTime::UNIX_EPOCH),
			"dest",
		);
		entity.add_origin("a");
		store.save(&[entity.clone()]).await.unwrap();
		assert!(store.writers.lock().await.is_empty());

		// A failing save prunes too
		entity.episode.up = Duration::from_secs(u64::MAX);
		assert!(store.save(&[entity]).await.is_err());
		assert!(store.writers.lock().await.is_empty());
	}

	#[tokio::test]
	async fn held_locks_survive_pruning() {
		let db = Database::memory().await.unwrap();
		let store = ExportStore::new(db.conn().clone(), ExportConfig::default());

		let _held = store.lock_destinations(&one("dest")).await;
		store.prune_writers().await;

		assert!(store.writers.lock().await.contains_key("dest"));
	}
}
