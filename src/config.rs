//! Environment-level configuration
//!
//! Recognized options select the store backend (in-process vs. networked,
//! with local-emulator detection by URL pattern), enable the outbound
//! webhook relay, and tune the timing parameters the engine treats as
//! configurable rather than fixed constants.

use crate::error::{WasherError, WasherResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable names
pub mod env_keys {
    pub const DATABASE_URL: &str = "WASHERWATCH_DATABASE_URL";
    pub const WEBHOOK_URL: &str = "WASHERWATCH_WEBHOOK_URL";
    pub const WEBHOOK_TOKEN: &str = "WASHERWATCH_WEBHOOK_TOKEN";
    pub const REMINDER_THROTTLE_SECS: &str = "WASHERWATCH_REMINDER_THROTTLE_SECS";
    pub const TICK_PERIOD_SECS: &str = "WASHERWATCH_TICK_PERIOD_SECS";
}

/// Default reminder throttle window in seconds
pub const DEFAULT_REMINDER_THROTTLE_SECS: u64 = 60;

/// Default tick period in seconds
pub const DEFAULT_TICK_PERIOD_SECS: u64 = 5;

/// Which store backend to construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store (no connection URL configured)
    Memory,
    /// Local emulator of the networked store, detected by URL pattern
    Emulator(Url),
    /// Live networked store
    Live(Url),
}

/// Backing-store connection parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Connection URL; absent selects the in-process backend
    pub database_url: Option<Url>,
}

impl StoreConfig {
    /// Resolve which backend this configuration selects
    ///
    /// A URL whose host is a loopback name is treated as a local emulator.
    pub fn backend(&self) -> StoreBackend {
        match &self.database_url {
            None => StoreBackend::Memory,
            Some(url) => {
                if is_emulator_url(url) {
                    StoreBackend::Emulator(url.clone())
                } else {
                    StoreBackend::Live(url.clone())
                }
            }
        }
    }
}

fn is_emulator_url(url: &Url) -> bool {
    matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    )
}

/// Outbound webhook relay parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Base URL of the relay; the client posts to `{url}/notify`
    pub url: Url,
    /// Bearer token, if the relay requires authentication
    pub bearer_token: Option<String>,
}

/// Tunable timing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    pub reminder_throttle_secs: u64,
    pub tick_period_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reminder_throttle_secs: DEFAULT_REMINDER_THROTTLE_SECS,
            tick_period_secs: DEFAULT_TICK_PERIOD_SECS,
        }
    }
}

impl TimingConfig {
    pub fn reminder_throttle(&self) -> Duration {
        Duration::seconds(self.reminder_throttle_secs as i64)
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_period_secs)
    }
}

/// Full application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub webhook: Option<WebhookConfig>,
    pub timing: TimingConfig,
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> WasherResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Used by `from_env` and by tests, which pass a map instead of mutating
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WasherResult<Self> {
        let database_url = lookup(env_keys::DATABASE_URL)
            .map(|raw| Url::parse(&raw))
            .transpose()?;

        let webhook = match lookup(env_keys::WEBHOOK_URL) {
            Some(raw) => Some(WebhookConfig {
                url: Url::parse(&raw)?,
                bearer_token: lookup(env_keys::WEBHOOK_TOKEN),
            }),
            None => None,
        };

        let timing = TimingConfig {
            reminder_throttle_secs: parse_secs(
                lookup(env_keys::REMINDER_THROTTLE_SECS),
                env_keys::REMINDER_THROTTLE_SECS,
                DEFAULT_REMINDER_THROTTLE_SECS,
            )?,
            tick_period_secs: parse_secs(
                lookup(env_keys::TICK_PERIOD_SECS),
                env_keys::TICK_PERIOD_SECS,
                DEFAULT_TICK_PERIOD_SECS,
            )?,
        };

        Ok(Self {
            store: StoreConfig { database_url },
            webhook,
            timing,
        })
    }
}

fn parse_secs(raw: Option<String>, key: &str, default: u64) -> WasherResult<u64> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map_err(|e| WasherError::ConfigError(format!("{}: {}", key, e))),
    }
}
