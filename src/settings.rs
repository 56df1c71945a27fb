use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SOURCE_URL: &str = "https://www.jakdolece.pl/rozklad-lotow/warszawa-waw/odloty";
pub const DEFAULT_PAGE_CACHE: &str = "data/schedule_data.html";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime settings, read from `FLIGHTS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    db_uri: Option<String>,
    pub source_url: String,
    pub page_cache: PathBuf,
    pub timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix("FLIGHTS").try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings = builder
            .set_default("source_url", DEFAULT_SOURCE_URL)?
            .set_default("page_cache", DEFAULT_PAGE_CACHE)?
            .set_default("timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Connection string of the document store. Storage commands cannot start without it.
    pub fn db_uri(&self) -> Result<&str, ConfigError> {
        self.db_uri
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .ok_or(ConfigError::Missing("FLIGHTS_DB_URI"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
