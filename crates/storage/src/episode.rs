//! Episode value types shared by the rollup and export stores

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probe name that stands for "every probe of the group" in queries
pub const TOTAL_PROBE_NAME: &str = "__total__";

/// What was checked: a probe inside a check group
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProbeRef {
	pub group: String,
	pub probe: String,
}

impl ProbeRef {
	pub fn new(group: impl Into<String>, probe: impl Into<String>) -> Self {
		Self {
			group: group.into(),
			probe: probe.into(),
		}
	}

	/// Canonical `group/probe` identifier
	#[must_use]
	pub fn id(&self) -> String {
		format!("{}/{}", self.group, self.probe)
	}

	#[must_use]
	pub fn is_wildcard_probe(&self) -> bool {
		self.probe == TOTAL_PROBE_NAME
	}
}

impl fmt::Display for ProbeRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.group, self.probe)
	}
}

/// Availability summary of one probe in one time bucket.
///
/// The four counters are expected to add up to the bucket length. Storage does
/// not enforce it, see [`Episode::is_correct`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
	pub probe_ref: ProbeRef,
	pub time_slot: DateTime<Utc>,
	pub up: Duration,
	pub down: Duration,
	pub unknown: Duration,
	pub no_data: Duration,
}

impl Episode {
	/// Empty episode for the slot, all counters zeroed
	#[must_use]
	pub fn new(probe_ref: ProbeRef, time_slot: DateTime<Utc>) -> Self {
		Self {
			probe_ref,
			time_slot,
			..Default::default()
		}
	}

	#[must_use]
	pub fn total(&self) -> Duration {
		self.up + self.down + self.unknown + self.no_data
	}

	#[must_use]
	pub fn is_correct(&self, slot_size: Duration) -> bool {
		self.total() == slot_size
	}

	/// Whether the slot lies within `[from, to)`, in Unix seconds
	#[must_use]
	pub fn is_in_range(&self, from: i64, to: i64) -> bool {
		let ts = self.time_slot.timestamp();
		from <= ts && ts < to
	}
}

/// Half-open interval `[from, to)` in Unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
	pub from: i64,
	pub to: i64,
}

impl Range {
	#[must_use]
	pub const fn new(from: i64, to: i64) -> Self {
		Self { from, to }
	}

	#[must_use]
	pub fn diff(&self) -> Duration {
		Duration::from_secs(u64::try_from(self.to - self.from).unwrap_or_default())
	}
}

/// A period cut into consecutive steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRange {
	pub from: i64,
	pub to: i64,
	pub step: i64,
	pub subranges: Vec<Range>,
}

impl StepRange {
	/// Splits `[from, to)` into `step`-sized subranges, the last one clipped to `to`.
	#[must_use]
	pub fn new(from: i64, to: i64, step: i64) -> Self {
		let mut subranges = Vec::new();

		if step > 0 {
			let mut start = from;
			while start < to {
				let end = (start + step).min(to);
				subranges.push(Range::new(start, end));
				start = end;
			}
		}

		Self {
			from,
			to,
			step,
			subranges,
		}
	}

	/// Wraps caller-built subranges as is
	#[must_use]
	pub fn from_subranges(subranges: Vec<Range>) -> Self {
		let from = subranges.first().map_or(0, |r| r.from);
		let to = subranges.last().map_or(0, |r| r.to);
		let step = subranges.first().map_or(0, |r| r.to - r.from);

		Self {
			from,
			to,
			step,
			subranges,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	fn slot(ts: i64) -> DateTime<Utc> {
		DateTime::from_timestamp(ts, 0).unwrap()
	}

	#[test]
	fn probe_ref_id_is_group_slash_probe() {
		let r = ProbeRef::new("nginx", "main");
		assert_eq!(r.id(), "nginx/main");
		assert_eq!(r.to_string(), r.id());
		assert!(!r.is_wildcard_probe());
		assert!(ProbeRef::new("nginx", TOTAL_PROBE_NAME).is_wildcard_probe());
	}

	#[test]
	fn correctness_checks_the_bucket_length() {
		let mut ep = Episode::new(ProbeRef::new("g", "p"), slot(300));
		ep.up = Duration::from_secs(20);
		ep.down = Duration::from_secs(5);
		ep.no_data = Duration::from_secs(5);

		assert!(ep.is_correct(Duration::from_secs(30)));
		assert!(!ep.is_correct(Duration::from_secs(300)));
	}

	#[test]
	fn range_check_is_half_open() {
		let ep = Episode::new(ProbeRef::new("g", "p"), slot(300));

		assert!(ep.is_in_range(300, 330));
		assert!(ep.is_in_range(0, 301));
		assert!(!ep.is_in_range(0, 300));
		assert!(!ep.is_in_range(301, 600));
	}

	#[test]
	fn step_range_clips_last_subrange() {
		let rng = StepRange::new(0, 700, 300);

		assert_eq!(
			rng.subranges,
			vec![Range::new(0, 300), Range::new(300, 600), Range::new(600, 700)]
		);
		assert_eq!(rng.subranges[2].diff(), Duration::from_secs(100));
	}

	#[test]
	fn step_range_without_step_is_empty() {
		assert!(StepRange::new(0, 700, 0).subranges.is_empty());
		assert!(StepRange::new(700, 0, 300).subranges.is_empty());
	}
}
