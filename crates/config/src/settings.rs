//! Centralized settings for the delivery subsystem
//!
//! `Settings` is immutable after construction and is designed to be
//! `Clone + Send + Sync` so it can be handed to the delivery thread and the
//! foreground session alike.

use ricloud_core::{Error, Result, RICLOUD_ENV_PREFIX};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_API_HOST: &str = "https://asapi.reincubate.com";
const DEFAULT_TOKEN: &str = "your-ricloud-api-access-token-here";
const DEFAULT_STREAM_CHANNEL: &str = "your-aschannel-stream-name-here";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Root settings for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base URL of the task API, endpoint paths are appended to it
    pub api_host: String,

    /// Access token sent as `Authorization: Token <token>`
    pub token: String,

    /// Relative API endpoint paths
    pub endpoints: EndpointSettings,

    /// Push stream settings
    pub stream: StreamSettings,

    /// Object-store polling settings
    pub object_store: ObjectStoreSettings,

    /// Chunk reassembly buffers
    pub chunks: ChunkSettings,

    /// Root directory for downloaded files
    pub output_dir: PathBuf,

    /// Timeout for ordinary (non-streaming) API requests
    pub request_timeout: Duration,

    /// How many times a failed database write is retried after reconnecting
    pub database_retries: u32,

    /// How often the foreground checks that the delivery thread is alive
    pub watchdog_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    pub account_information: String,
    pub task_status: String,
    pub result_consumed: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Channel name passed as the `stream` query parameter
    pub channel: String,
    /// Timeout for establishing the streaming connection
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    /// Size of the result-fetch worker pool
    pub workers: usize,
    /// Maximum task ids per status request
    pub max_batch: usize,
    /// Sleep between ticks when nothing is pending
    pub idle_interval: Duration,
    /// Extra sleep after a tick that had pending work
    pub busy_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSettings {
    /// How often stale reassembly buffers are swept
    pub sweep_interval: Duration,
    /// Age after which an incomplete buffer is dropped
    pub idle_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            token: DEFAULT_TOKEN.to_string(),
            endpoints: EndpointSettings::default(),
            stream: StreamSettings::default(),
            object_store: ObjectStoreSettings::default(),
            chunks: ChunkSettings::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            database_retries: 1,
            watchdog_interval: Duration::from_secs(1),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            account_information: "/account/information/".to_string(),
            task_status: "/task/status/".to_string(),
            result_consumed: "/task/result-consumed/".to_string(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_STREAM_CHANNEL.to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            max_batch: ricloud_core::MAX_PENDING_BATCH,
            idle_interval: Duration::from_secs(1),
            busy_interval: Duration::from_secs(5),
        }
    }
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

impl Settings {
    /// Defaults with overrides from the process environment
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::default().with_overrides(&vars)
    }

    /// Apply `RICLOUD_<NAME>` overrides from the given variable map
    pub fn with_overrides(mut self, vars: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| vars.get(&format!("{RICLOUD_ENV_PREFIX}{name}"));

        if let Some(value) = get("API_HOST") {
            self.api_host = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = get("TOKEN") {
            self.token = value.clone();
        }
        if let Some(value) = get("STREAM_ENDPOINT") {
            self.stream.channel = value.clone();
        }
        if let Some(value) = get("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(value);
        }
        if let Some(value) = get("WORKERS") {
            self.object_store.workers = parse_number("WORKERS", value)?;
        }
        if let Some(value) = get("MAX_PENDING") {
            self.object_store.max_batch = parse_number("MAX_PENDING", value)?;
        }
        if let Some(value) = get("REQUEST_TIMEOUT") {
            self.request_timeout = Duration::from_secs(parse_number("REQUEST_TIMEOUT", value)?);
        }
        if let Some(value) = get("CHUNK_SWEEP_INTERVAL") {
            self.chunks.sweep_interval =
                Duration::from_secs(parse_number("CHUNK_SWEEP_INTERVAL", value)?);
        }
        if let Some(value) = get("CHUNK_IDLE_TIMEOUT") {
            self.chunks.idle_timeout =
                Duration::from_secs(parse_number("CHUNK_IDLE_TIMEOUT", value)?);
        }
        if let Some(value) = get("DATABASE_RETRIES") {
            self.database_retries = parse_number("DATABASE_RETRIES", value)?;
        }

        self.validate()?;
        tracing::debug!(api_host = %self.api_host, channel = %self.stream.channel, "settings loaded");
        Ok(self)
    }

    /// Check invariants the delivery code relies on
    pub fn validate(&self) -> Result<()> {
        if self.api_host.is_empty() {
            return Err(Error::configuration("api host must not be empty"));
        }
        if self.token.is_empty() {
            return Err(Error::configuration("access token must not be empty"));
        }
        if self.object_store.workers == 0 {
            return Err(Error::configuration(
                "object store worker pool needs at least one worker",
            ));
        }
        if self.object_store.max_batch == 0 {
            return Err(Error::configuration("status batch size must be positive"));
        }
        if self.chunks.sweep_interval.is_zero() {
            return Err(Error::configuration("chunk sweep interval must be positive"));
        }
        Ok(())
    }

    /// Absolute URL for an API endpoint path
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.api_host, path)
    }

    #[must_use]
    pub fn account_information_url(&self) -> String {
        self.endpoint_url(&self.endpoints.account_information)
    }

    #[must_use]
    pub fn task_status_url(&self) -> String {
        self.endpoint_url(&self.endpoints.task_status)
    }

    #[must_use]
    pub fn result_consumed_url(&self) -> String {
        self.endpoint_url(&self.endpoints.result_consumed)
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::configuration(format!(
            "{RICLOUD_ENV_PREFIX}{name} must be a non-negative integer, got '{value}'"
        ))
    })
}
