//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section; every field has a default so an empty file is a valid config.

pub mod logging;
pub mod poller;
pub mod presence;
pub mod session;
pub mod store;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::poller::PollerConfig;
pub use self::presence::PresenceConfig;
pub use self::session::LiveSessionConfig;
pub use self::store::StoreConfig;
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// files (default.toml + environment overlay + `LESSONSYNC__*` variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Heartbeat and staleness settings.
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Push-to-poll degradation settings.
    #[serde(default)]
    pub poller: PollerConfig,
    /// Live session synchronizer settings.
    #[serde(default)]
    pub session: LiveSessionConfig,
    /// Document store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Reconciliation worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `LESSONSYNC__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("LESSONSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        self.presence.validate()?;
        self.poller.validate()?;
        Ok(())
    }
}
