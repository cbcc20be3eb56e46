use std::time::Duration;

use sea_orm::DbErr;

/// Storage operation errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	/// Nothing to hand out: either no rows at all, or none are deliverable yet
	#[error("not found")]
	NotFound,

	#[error("{op} ({context})")]
	Query {
		op: &'static str,
		context: String,
		#[source]
		source: DbErr,
	},

	/// Failure of a single item inside a non-atomic batch
	#[error("batch item {index}")]
	BatchItem {
		index: usize,
		#[source]
		source: Box<StorageError>,
	},

	#[error("duration {0:?} does not fit into stored nanoseconds")]
	InvalidDuration(Duration),

	#[error("stored timeslot {0} is out of range")]
	InvalidTimeSlot(i64),
}

impl StorageError {
	#[must_use]
	pub const fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound)
	}
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Wraps raw database errors with the failing operation and its key parameters.
pub(crate) trait QueryContext<T> {
	fn query_context(self, op: &'static str, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> QueryContext<T> for std::result::Result<T, DbErr> {
	fn query_context(self, op: &'static str, context: impl FnOnce() -> String) -> Result<T> {
		self.map_err(|source| StorageError::Query {
			op,
			context: context(),
			source,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_errors_carry_operation_and_key() {
		let res: std::result::Result<(), DbErr> = Err(DbErr::Custom("disk I/O error".into()));

		let err = res
			.query_context("delete_up_to", || "sync_id=abc slot=300".to_string())
			.unwrap_err();

		assert_eq!(err.to_string(), "delete_up_to (sync_id=abc slot=300)");
		assert!(!err.is_not_found());

		// The database error is reachable through the chain only
		let source = std::error::Error::source(&err).unwrap().to_string();
		assert!(source.contains("disk I/O error"), "{source}");
	}

	#[test]
	fn batch_item_reports_index() {
		let err = StorageError::BatchItem {
			index: 3,
			source: Box::new(StorageError::InvalidTimeSlot(-1)),
		};

		assert_eq!(err.to_string(), "batch item 3");
		assert_eq!(
			std::error::Error::source(&err).unwrap().to_string(),
			"stored timeslot -1 is out of range"
		);
	}
}
