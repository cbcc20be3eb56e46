//! Database infrastructure using SeaORM

use sea_orm::{ConnectOptions, Database as SeaDatabase, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::StorageConfig;

pub mod entities;
pub mod migration;

/// Database wrapper for the episode stores
#[derive(Debug, Clone)]
pub struct Database {
	conn: DatabaseConnection,
}

impl Database {
	/// Create a new database at the specified path
	pub async fn create(path: &Path, config: &StorageConfig) -> Result<Self, DbErr> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| DbErr::Custom(format!("Failed to create directory: {e}")))?;
		}

		let conn = SeaDatabase::connect(connect_options(
			format!("sqlite://{}?mode=rwc", path.display()),
			config,
		))
		.await?;

		info!("Created new database at {:?}", path);

		Ok(Self { conn })
	}

	/// Open an existing database
	pub async fn open(path: &Path, config: &StorageConfig) -> Result<Self, DbErr> {
		if !path.exists() {
			return Err(DbErr::Custom(format!(
				"Database does not exist: {}",
				path.display()
			)));
		}

		let conn = SeaDatabase::connect(connect_options(
			format!("sqlite://{}", path.display()),
			config,
		))
		.await?;

		info!("Opened database at {:?}", path);

		Ok(Self { conn })
	}

	/// Open or create the configured database file and bring its schema up to date
	pub async fn from_config(config: &StorageConfig) -> Result<Self, DbErr> {
		let path = config.database_path.as_path();
		let db = if path.exists() {
			Self::open(path, config).await?
		} else {
			Self::create(path, config).await?
		};
		db.migrate().await?;

		Ok(db)
	}

	/// In-memory database, migrated and ready to use.
	///
	/// Every SQLite connection to `:memory:` gets its own database, so the pool
	/// is pinned to a single connection, see [`memory_options`].
	pub async fn memory() -> Result<Self, DbErr> {
		let db = Self {
			conn: SeaDatabase::connect(memory_options()).await?,
		};
		db.migrate().await?;

		Ok(db)
	}

	/// Run migrations
	pub async fn migrate(&self) -> Result<(), DbErr> {
		migration::Migrator::up(&self.conn, None).await?;
		info!("Database migrations completed successfully");
		Ok(())
	}

	/// Get the database connection
	pub const fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}
}

/// Lifetime limits far beyond any process uptime
const MEMORY_CONN_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Pool options for `:memory:`.
///
/// The pool reaper closes connections past the idle or lifetime limit and
/// opens a replacement, which for `:memory:` is a new empty database. Both
/// limits are pushed out so the single connection outlives the pool user.
fn memory_options() -> ConnectOptions {
	let mut opt = ConnectOptions::new("sqlite::memory:");
	opt.max_connections(1)
		.min_connections(1)
		.idle_timeout(MEMORY_CONN_LIFETIME)
		.max_lifetime(MEMORY_CONN_LIFETIME)
		.sqlx_logging(false);
	opt
}

fn connect_options(url: String, config: &StorageConfig) -> ConnectOptions {
	let mut opt = ConnectOptions::new(url);
	opt.max_connections(config.max_connections)
		.min_connections(1)
		.connect_timeout(Duration::from_secs(config.connect_timeout_secs))
		.sqlx_logging(false); // We'll use tracing instead
	opt
}

#[cfg(test)]
mod tests {
	use super::*;

	use sea_orm::{ConnectionTrait, DbBackend, Statement};
	use tempfile::TempDir;

	async fn table_names(db: &Database) -> Vec<String> {
		let rows = db
			.conn()
			.query_all(Statement::from_string(
				DbBackend::Sqlite,
				"SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
			))
			.await
			.unwrap();

		rows.iter()
			.map(|row| row.try_get::<String>("", "name").unwrap())
			.collect()
	}

	#[tokio::test]
	async fn memory_database_is_migrated() {
		let db = Database::memory().await.unwrap();
		let tables = table_names(&db).await;

		for table in ["episodes_30s", "episodes_5m", "export_episodes"] {
			assert!(tables.iter().any(|t| t == table), "{table} in {tables:?}");
		}
	}

	#[test]
	fn memory_pool_never_recycles_its_connection() {
		let opt = memory_options();

		assert_eq!(opt.get_max_connections(), Some(1));
		assert_eq!(opt.get_min_connections(), Some(1));
		// sqlx would otherwise fall back to 10 minutes idle and 30 minutes lifetime
		assert_eq!(opt.get_idle_timeout(), Some(MEMORY_CONN_LIFETIME));
		assert_eq!(opt.get_max_lifetime(), Some(MEMORY_CONN_LIFETIME));
		assert!(MEMORY_CONN_LIFETIME > Duration::from_secs(365 * 24 * 60 * 60));
	}

	#[tokio::test]
	async fn create_then_open_keeps_schema() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("nested").join("upmeter.db");
		let config = StorageConfig::default();

		let db = Database::create(&path, &config).await.unwrap();
		db.migrate().await.unwrap();
		drop(db);

		let db = Database::open(&path, &config).await.unwrap();
		// Migrations are idempotent
		db.migrate().await.unwrap();
		assert!(table_names(&db).await.iter().any(|t| t == "export_episodes"));
	}

	#[tokio::test]
	async fn from_config_creates_and_reopens() {
		let temp_dir = TempDir::new().unwrap();
		let config = StorageConfig {
			database_path: temp_dir.path().join("data").join("upmeter.db"),
			max_connections: 2,
			..Default::default()
		};

		let db = Database::from_config(&config).await.unwrap();
		assert!(config.database_path.exists());
		drop(db);

		let db = Database::from_config(&config).await.unwrap();
		assert!(table_names(&db).await.iter().any(|t| t == "episodes_5m"));
	}

	#[tokio::test]
	async fn open_fails_on_missing_file() {
		let temp_dir = TempDir::new().unwrap();
		let res = Database::open(&temp_dir.path().join("nope.db"), &StorageConfig::default()).await;

		assert!(matches!(res, Err(DbErr::Custom(_))));
	}
}
