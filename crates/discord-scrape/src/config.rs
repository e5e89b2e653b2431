//! Scrape configuration: defaults tuned for a stock Discord install, with
//! environment overrides for the knobs people actually need to turn.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::locators::LocatorStrategy;
use crate::retry::BackoffPolicy;

/// Port Discord is relaunched with when debugging is not already enabled.
pub const DEFAULT_DEBUG_PORT: u16 = 31337;

pub const ENV_PORT: &str = "DISCORD_SCRAPE_PORT";
pub const ENV_MAX_ATTEMPTS: &str = "DISCORD_SCRAPE_MAX_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "DISCORD_SCRAPE_RETRY_DELAY_MS";
pub const ENV_COMMAND_TIMEOUT_MS: &str = "DISCORD_SCRAPE_COMMAND_TIMEOUT_MS";
pub const ENV_LOCATORS: &str = "DISCORD_SCRAPE_LOCATORS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub debug_port: u16,
    /// Executable names that identify the Discord client process.
    pub executable_names: Vec<String>,
    pub retry: BackoffPolicy,
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// How long to wait for the DevTools banner after relaunching.
    #[serde(with = "duration_ms")]
    pub launch_timeout: Duration,
    /// How long killed processes get to disappear before relaunching.
    #[serde(with = "duration_ms")]
    pub exit_grace: Duration,
    #[serde(with = "duration_ms")]
    pub endpoint_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub endpoint_poll: Duration,
    #[serde(with = "duration_ms")]
    pub post_connect_settle: Duration,
    #[serde(with = "duration_ms")]
    pub post_navigation_settle: Duration,
    #[serde(with = "duration_ms")]
    pub dom_wait_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub dom_poll_interval: Duration,
    pub locators: LocatorStrategy,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            debug_port: DEFAULT_DEBUG_PORT,
            executable_names: default_executable_names(),
            retry: BackoffPolicy::default(),
            command_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            launch_timeout: Duration::from_secs(60),
            exit_grace: Duration::from_secs(10),
            endpoint_timeout: Duration::from_secs(30),
            endpoint_poll: Duration::from_millis(500),
            post_connect_settle: Duration::from_secs(5),
            post_navigation_settle: Duration::from_secs(1),
            dom_wait_timeout: Duration::from_secs(10),
            dom_poll_interval: Duration::from_millis(250),
            locators: LocatorStrategy::default(),
        }
    }
}

impl ScrapeConfig {
    /// Defaults with overrides from the process environment applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from any key/value source. Values that fail to parse
    /// are logged and ignored so a typo never prevents a scrape.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var(&lookup, ENV_PORT) {
            self.debug_port = port;
        }
        if let Some(attempts) = parse_var(&lookup, ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_RETRY_DELAY_MS) {
            self.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_COMMAND_TIMEOUT_MS) {
            self.command_timeout = Duration::from_millis(ms);
        }
        if let Some(path) = lookup(ENV_LOCATORS) {
            match load_locators(Path::new(&path)) {
                Ok(locators) => self.locators = locators,
                Err(e) => warn!(path = %path, error = format!("{e:#}"), "Ignoring locator override"),
            }
        }
    }
}

/// Read a [`LocatorStrategy`] from a JSON file.
pub fn load_locators(path: &Path) -> anyhow::Result<LocatorStrategy> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    LocatorStrategy::from_json(&text).with_context(|| format!("parsing locators in {}", path.display()))
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            debug!(key, value = %raw, "Applying config override");
            Some(value)
        }
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable config override");
            None
        }
    }
}

#[cfg(target_os = "windows")]
fn default_executable_names() -> Vec<String> {
    vec!["Discord.exe".to_string()]
}

#[cfg(target_os = "macos")]
fn default_executable_names() -> Vec<String> {
    vec!["Discord".to_string()]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn default_executable_names() -> Vec<String> {
    vec!["Discord".to_string(), "discord".to_string()]
}

/// Serialize a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
