use std::{str::FromStr, time::Duration};

use eyre::{eyre, Result};

use crate::model::LedgerAddress;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub funding_address: LedgerAddress,
    pub funding_secret_env: String,

    pub poll_interval: Duration,
    pub max_in_flight: u32,

    pub database_url: Option<String>,

    pub once: bool,
    pub dry_run: bool,
}

impl PipelineConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli(
        funding_address: String,
        funding_secret_env: String,
        poll_interval_ms: u64,
        max_in_flight: u32,
        database_url: Option<String>,
        once: bool,
        dry_run: bool,
    ) -> Result<Self> {
        let funding_address = LedgerAddress::from_str(&funding_address)
            .map_err(|e| eyre!("invalid funding address '{funding_address}': {e}"))?;

        if max_in_flight == 0 {
            return Err(eyre!("max in flight must be > 0"));
        }

        if database_url.is_none() && !dry_run {
            tracing::warn!(
                "no --database-url given; falling back to the in-memory store, which does not survive a restart"
            );
        }

        Ok(Self {
            funding_address,
            funding_secret_env,
            poll_interval: Duration::from_millis(poll_interval_ms.max(50)),
            max_in_flight,
            database_url,
            once,
            dry_run,
        })
    }
}
