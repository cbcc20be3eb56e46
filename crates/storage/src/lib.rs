#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Availability episode storage for upmeter.
//!
//! Two stores live here:
//!
//! - [`EpisodeStore`] keeps per-(slot, group, probe) rollups at a fixed
//!   [`Granularity`] (30 seconds or 5 minutes), with retention trimming and
//!   range summation.
//! - [`ExportStore`] keeps the same rollups per destination, merging the set of
//!   contributing agents ([`OriginSet`]) and handing out the earliest deliverable
//!   slot to the shipper.
//!
//! Both stores are thin layers over an injected [`sea_orm::DatabaseConnection`]
//! obtained from [`Database`].

pub mod config;
pub mod database;
pub mod episode;
pub mod error;
pub mod export;
pub mod logging;
pub mod origins;
pub mod rollup;

pub use config::{ExportConfig, LoggingConfig, StorageConfig};
pub use database::Database;
pub use episode::{Episode, ProbeRef, Range, StepRange, TOTAL_PROBE_NAME};
pub use error::{Result, StorageError};
pub use export::{ExportEntity, ExportStore};
pub use origins::OriginSet;
pub use rollup::{EpisodeEntity, EpisodeStore, Granularity, RowId, SumGrouping};
