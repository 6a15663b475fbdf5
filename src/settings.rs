use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::Config;
use serde::Deserialize;

const CONFIG_FILE: &str = "ingest";
const ENV_PREFIX: &str = "ESPORTS";

/// Run configuration. Built once in `main` and passed by reference to
/// everything that touches the network or the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    /// Pages in flight per dataset.
    pub concurrency: usize,
    /// Rows per insert transaction.
    pub batch_size: usize,
    pub user_agent: String,
    pub catalog_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/esports.sqlite"),
            request_timeout_secs: 30,
            max_retries: 3,
            base_backoff_ms: 1000,
            concurrency: 4,
            batch_size: 500,
            user_agent: format!("esports_ingest/{}", env!("CARGO_PKG_VERSION")),
            catalog_dir: PathBuf::from("data/catalog"),
        }
    }
}

impl Settings {
    /// Defaults, then `ingest.toml` if present, then `ESPORTS_*` variables.
    pub fn load() -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Upper bound for one page including every retry and its backoff.
    pub fn page_deadline(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff = (0..self.max_retries)
            .map(|a| crate::fetch::backoff(self.base_backoff_ms, a))
            .fold(Duration::ZERO, Duration::saturating_add);
        Duration::from_secs(self.request_timeout_secs.saturating_mul(attempts)).saturating_add(backoff)
    }
}
