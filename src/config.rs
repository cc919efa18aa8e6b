use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::{client::Credentials, transport::DEFAULT_BASE_URL};

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub base_url: String,
    /// Seconds between two `get_data()` cycles of the poller.
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("missing required env var: {key}"))
        };
        let optional = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let poll_interval_secs: u64 = optional("POLL_INTERVAL_SECS", "300")
            .parse()
            .context("POLL_INTERVAL_SECS must be a positive integer")?;
        if poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be a positive integer");
        }

        Ok(Self {
            credentials: Credentials::new(
                required("SENSORPUSH_EMAIL")?,
                required("SENSORPUSH_PASSWORD")?,
            ),
            base_url: optional("SENSORPUSH_BASE_URL", DEFAULT_BASE_URL),
            poll_interval_secs,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
