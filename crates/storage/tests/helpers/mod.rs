#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use upmeter_storage::{Database, Episode, ExportEntity, ProbeRef};

pub fn slot(ts: i64) -> DateTime<Utc> {
	DateTime::from_timestamp(ts, 0).unwrap()
}

pub async fn memory_db() -> Database {
	Database::memory().await.unwrap()
}

pub fn random_name(len: usize) -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(len)
		.map(char::from)
		.collect()
}

/// Episode whose counters add up to a 30 second slot
pub fn random_episode(probe_ref: ProbeRef, time_slot: DateTime<Utc>) -> Episode {
	let mut rng = rand::thread_rng();
	let up = rng.gen_range(0..=30_000);
	let down = rng.gen_range(0..=30_000 - up);
	let unknown = rng.gen_range(0..=30_000 - up - down);

	Episode {
		probe_ref,
		time_slot,
		up: Duration::from_millis(up),
		down: Duration::from_millis(down),
		unknown: Duration::from_millis(unknown),
		no_data: Duration::from_millis(30_000 - up - down - unknown),
	}
}

/// `n` episodes of random probes sharing the slot
pub fn random_episodes(n: usize, time_slot: DateTime<Utc>) -> Vec<Episode> {
	(0..n)
		.map(|i| {
			random_episode(
				ProbeRef::new(format!("group-{i}"), random_name(8)),
				time_slot,
			)
		})
		.collect()
}

/// `n` export entities for the destination, each reported by one random origin
pub fn random_export_entities(
	n: usize,
	sync_id: &str,
	time_slot: DateTime<Utc>,
) -> Vec<ExportEntity> {
	random_episodes(n, time_slot)
		.into_iter()
		.map(|episode| {
			let mut entity = ExportEntity::new(episode, sync_id);
			entity.add_origin(random_name(6));
			entity
		})
		.collect()
}

/// Entities ordered the way the store lists them
pub fn sorted(mut entities: Vec<ExportEntity>) -> Vec<ExportEntity> {
	entities.sort_by(|a, b| a.episode.probe_ref.cmp(&b.episode.probe_ref));
	entities
}
