//! Storage configuration

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Storage configuration, persisted as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
	/// Config schema version
	pub version: u32,

	/// SQLite database file
	pub database_path: PathBuf,

	/// Pool size for file-backed databases
	pub max_connections: u32,

	pub connect_timeout_secs: u64,

	pub export: ExportConfig,

	pub logging: LoggingConfig,
}

/// Export selection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
	/// How far a slot must lag behind the query instant to be handed out
	/// without waiting for the origins quorum. Zero means "any slot strictly
	/// before now".
	pub delivery_grace_secs: u64,
}

impl ExportConfig {
	#[must_use]
	pub const fn delivery_grace(&self) -> Duration {
		Duration::from_secs(self.delivery_grace_secs)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	/// `EnvFilter` directives, overridden by `RUST_LOG`
	pub filter: String,

	pub with_target: bool,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			filter: "upmeter_storage=info".to_string(),
			with_target: true,
		}
	}
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			version: Self::target_version(),
			database_path: PathBuf::from("upmeter.db"),
			max_connections: 10,
			connect_timeout_secs: 8,
			export: ExportConfig::default(),
			logging: LoggingConfig::default(),
		}
	}
}

impl StorageConfig {
	#[must_use]
	pub const fn target_version() -> u32 {
		1
	}

	/// Load configuration from a JSON file, writing defaults when it is absent
	pub fn load_from(path: &Path) -> Result<Self> {
		if path.exists() {
			info!("Loading storage config from {:?}", path);
			let json = fs::read_to_string(path)?;
			let mut config: Self = serde_json::from_str(&json)?;

			if config.version < Self::target_version() {
				info!(
					"Migrating storage config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save(path)?;
			}

			config.validate()?;
			Ok(config)
		} else {
			warn!("No storage config found, creating default at {:?}", path);
			let config = Self::default();
			config.save(path)?;
			Ok(config)
		}
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		fs::write(path, serde_json::to_string_pretty(self)?)?;
		info!("Saved storage config to {:?}", path);
		Ok(())
	}

	pub fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(anyhow!("Unknown storage config version: {v}")),
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_connections == 0 {
			return Err(anyhow!("max_connections must be positive"));
		}
		if self.connect_timeout_secs == 0 {
			return Err(anyhow!("connect_timeout_secs must be positive"));
		}
		Ok(())
	}
}
