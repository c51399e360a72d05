// src/config.rs
//
// Environment-driven configuration. Every knob has a default so the
// generator runs against a local server with no setup at all.

use std::time::Duration;

use crate::constants::{DEFAULT_MAX_WRITES_PER_TICK, DEFAULT_PATH_PREFIX, TICK_DURATION};

/// Components of the file-server base URL. Requests address
/// `{proto}://{host}:{port}/{prefix}/{filename}`.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub proto: String,
    pub host: String,
    pub port: u16,
    /// No leading or trailing slashes.
    pub path_prefix: String,
}

impl EndpointConfig {
    pub fn file_url(&self, file_name: &str) -> String {
        format!(
            "{}://{}:{}/{}/{}",
            self.proto, self.host, self.port, self.path_prefix, file_name
        )
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            proto: "http".into(),
            host: "localhost".into(),
            port: 1234,
            path_prefix: DEFAULT_PATH_PREFIX.into(),
        }
    }
}

/// Full generator configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: EndpointConfig,

    /// Steady-state cap on the tracked file population.
    pub max_file_count: usize,

    /// Initial upper bound for random payload sizes, in bytes.
    pub max_file_size: u64,

    /// Base request rate R0, in requests per tick.
    pub requests_per_second: usize,

    /// Additive per-tick rate growth.
    pub seed_growth_amount: f64,

    /// When set, `ramp_factor` grows once per minute, compounding the
    /// per-tick growth.
    pub enable_request_ramp: bool,

    /// When set, `max_file_size` is multiplied by 1.5 every 15 seconds.
    pub enable_file_ramp: bool,

    /// When set, one payload in a hundred is replaced with a fixed huge
    /// upload regardless of the current size bound.
    pub upload_huge_files: bool,

    /// CREATE + PUT emissions allowed per tick.
    pub max_writes_per_tick: usize,

    /// Scheduling tick length.
    pub tick: Duration,

    /// Where the run log is written. Uncreatable is fatal at startup.
    pub log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            max_file_count: 500,
            max_file_size: 1024,
            requests_per_second: 1,
            seed_growth_amount: 1.0,
            enable_request_ramp: false,
            enable_file_ramp: false,
            upload_huge_files: false,
            max_writes_per_tick: DEFAULT_MAX_WRITES_PER_TICK,
            tick: TICK_DURATION,
            log_file: "/tmp/fsload.log".into(),
        }
    }
}

impl Config {
    /// Build a config from the process environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoint: EndpointConfig {
                proto: env_or("FILE_SERVER_PROTO", d.endpoint.proto),
                host: env_or("FILE_SERVER_HOST", d.endpoint.host),
                port: env_parsed("FILE_SERVER_PORT", d.endpoint.port),
                path_prefix: env_or("FILE_SERVER_PATH_PREFIX", d.endpoint.path_prefix),
            },
            max_file_count: env_parsed("MAX_FILE_COUNT", d.max_file_count),
            max_file_size: env_parsed("MAX_FILE_SIZE", d.max_file_size),
            requests_per_second: env_parsed("REQUESTS_PER_SECOND", d.requests_per_second),
            seed_growth_amount: env_parsed("SEED_GROWTH_AMOUNT", d.seed_growth_amount),
            enable_request_ramp: env_flag("ENABLE_REQUEST_RAMP"),
            enable_file_ramp: env_flag("ENABLE_FILE_RAMP"),
            upload_huge_files: env_flag("UPLOAD_RANDOM_LARGE_FILE"),
            max_writes_per_tick: env_parsed("MAX_WRITES_PER_SECOND", d.max_writes_per_tick),
            tick: d.tick,
            log_file: env_or("FSLOAD_LOG_FILE", d.log_file),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}
