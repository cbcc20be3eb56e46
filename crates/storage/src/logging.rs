//! Tracing setup for binaries and tests embedding the stores

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install a global fmt subscriber. Calls after the first one are no-ops.
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init(config: &LoggingConfig) -> Result<(), String> {
	let mut result = Ok(());

	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env()
			.or_else(|_| EnvFilter::try_new(&config.filter))
			.unwrap_or_else(|_| EnvFilter::new("info"));

		if let Err(e) = tracing_subscriber::registry()
			.with(filter)
			.with(
				fmt::layer()
					.with_target(config.with_target)
					.with_writer(std::io::stderr),
			)
			.try_init()
		{
			result = Err(format!("Failed to initialize tracing: {e}"));
		}
	});

	result
}
