//! Configuration management for the sinkline daemon.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use sinkline_core::{DispatchRuleConfig, DispatchTable};
use sinkline_delivery::{
    retry::BackoffStrategy, HttpConfig, PoolConfig, RetryPolicy, WorkerConfig,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_WORKER_COUNT,
};

const CONFIG_FILE: &str = "sinkline.toml";
const CONFIG_FILE_VAR: &str = "SINKLINE_CONFIG";
const ENV_PREFIX: &str = "SINKLINE_";

/// Complete daemon configuration.
///
/// Loaded in priority order:
/// 1. Environment variables prefixed `SINKLINE_`, nested keys split on `__`
///    (highest priority)
/// 2. Configuration file (`sinkline.toml`, or the path in `SINKLINE_CONFIG`)
/// 3. Built-in defaults (lowest priority)
///
/// ```toml
/// worker_count = 4
///
/// [destination]
/// type = "http"
/// url = "https://logs.example.com/ingest"
///
/// [[dispatch_rules]]
/// status_code = 500
/// match = "timeout"
/// action = "retry"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker threads.
    ///
    /// Environment variable: `SINKLINE_WORKER_COUNT`
    pub worker_count: usize,
    /// Bound on newly submitted messages waiting in the queue.
    ///
    /// Environment variable: `SINKLINE_QUEUE_CAPACITY`
    pub queue_capacity: usize,
    /// Requeued messages are discarded once attempted this often.
    ///
    /// Environment variable: `SINKLINE_MAX_ATTEMPTS`
    pub max_attempts: Option<u32>,
    /// Time allowed for draining and stopping, in milliseconds.
    ///
    /// Environment variable: `SINKLINE_SHUTDOWN_TIMEOUT_MS`
    pub shutdown_timeout_ms: u64,
    /// First reconnect delay in milliseconds.
    ///
    /// Environment variable: `SINKLINE_REOPEN_DELAY_MS`
    pub reopen_delay_ms: u64,
    /// Longest reconnect delay in milliseconds.
    ///
    /// Environment variable: `SINKLINE_REOPEN_MAX_DELAY_MS`
    pub reopen_max_delay_ms: u64,
    /// Backoff after a `retry` outcome.
    pub retry: RetryConfig,
    /// Seed for reproducible jitter.
    ///
    /// Environment variable: `SINKLINE_RNG_SEED`
    pub rng_seed: Option<u64>,
    /// Where messages are delivered.
    pub destination: DestinationConfig,
    /// Response rules, evaluated in the listed order.
    pub dispatch_rules: Vec<DispatchRuleConfig>,
}

/// Backoff settings for retried messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
    /// Growth strategy.
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter_factor: 0.25,
            strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Destination kind and its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationConfig {
    /// Append each message as a line to a file.
    File {
        /// Target file; its directory must exist.
        path: PathBuf,
    },
    /// POST each message to a URL.
    Http {
        /// Target URL.
        url: String,
        /// Request timeout in milliseconds.
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
        /// User agent override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_agent: Option<String>,
        /// Extra request headers.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl DestinationConfig {
    /// Short name used for counters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Http { .. } => "http",
        }
    }

    /// HTTP transport settings, if this is an HTTP destination.
    pub fn to_http_config(&self) -> Option<HttpConfig> {
        match self {
            Self::File { .. } => None,
            Self::Http { url, timeout_ms, user_agent, headers } => {
                let mut config = HttpConfig::for_url(url.clone());
                config.timeout = Duration::from_millis(*timeout_ms);
                config.headers = headers.clone();
                if let Some(user_agent) = user_agent {
                    config.user_agent = user_agent.clone();
                }
                Some(config)
            },
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self::File { path: PathBuf::from("sinkline.out") }
    }
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Layered configuration sources.
    pub fn figment() -> Figment {
        let file = std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| CONFIG_FILE.to_string());
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
    }

    /// Convert to the delivery crate's pool configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            worker: WorkerConfig {
                destination: self.destination.kind().to_string(),
                retry_policy: self.to_retry_policy(),
                reconnect_policy: self.to_reconnect_policy(),
                rng_seed: self.rng_seed,
            },
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    /// Policy applied to `retry` outcomes.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter_factor: self.retry.jitter_factor,
            backoff_strategy: self.retry.strategy,
        }
    }

    /// Policy applied between reconnect attempts.
    pub fn to_reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.reopen_delay_ms),
            max_delay: Duration::from_millis(self.reopen_max_delay_ms),
            jitter_factor: 0.1,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// Shutdown timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Builds the ordered dispatch table.
    ///
    /// # Errors
    ///
    /// Fails on the first rule with an unknown action or an out-of-range
    /// status code.
    pub fn dispatch_table(&self) -> Result<DispatchTable<Option<String>>> {
        DispatchTable::from_config(&self.dispatch_rules).context("invalid dispatch rule")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.max_attempts == Some(0) {
            anyhow::bail!("max_attempts must be greater than 0 when set");
        }

        if self.reopen_delay_ms == 0 {
            anyhow::bail!("reopen_delay_ms must be greater than 0");
        }

        if self.retry.base_delay_ms == 0 {
            anyhow::bail!("retry.base_delay_ms must be greater than 0");
        }

        if self.reopen_delay_ms > self.reopen_max_delay_ms {
            anyhow::bail!("reopen_delay_ms cannot exceed reopen_max_delay_ms");
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!("retry.base_delay_ms cannot exceed retry.max_delay_ms");
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            anyhow::bail!("retry.jitter_factor must be between 0.0 and 1.0");
        }

        if let DestinationConfig::Http { url, .. } = &self.destination {
            if url.is_empty() {
                anyhow::bail!("destination.url must be set for http destinations");
            }
        }

        self.dispatch_table().map(|_| ())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: None,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            reopen_delay_ms: 1_000,
            reopen_max_delay_ms: 60_000,
            retry: RetryConfig::default(),
            rng_seed: None,
            destination: DestinationConfig::default(),
            dispatch_rules: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use sinkline_core::Action;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.destination.kind(), "file");
        assert_eq!(config.to_retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn file_and_environment_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sinkline.toml",
                r#"
                worker_count = 4
                max_attempts = 5

                [retry]
                base_delay_ms = 100
                strategy = "linear"

                [destination]
                type = "http"
                url = "http://logs.internal/ingest"
                timeout_ms = 2500
                headers = { "X-Tenant" = "acme" }

                [[dispatch_rules]]
                status_code = 500
                match = "timeout"
                action = "retry"

                [[dispatch_rules]]
                status_code = 500
                action = "disconnect"
                context = "server error"
                "#,
            )?;
            jail.set_env("SINKLINE_WORKER_COUNT", "8");
            jail.set_env("SINKLINE_RETRY__JITTER_FACTOR", "0.5");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.worker_count, 8);
            assert_eq!(config.max_attempts, Some(5));
            assert_eq!(config.retry.base_delay_ms, 100);
            assert_eq!(config.retry.strategy, BackoffStrategy::Linear);
            assert!((config.retry.jitter_factor - 0.5).abs() < f64::EPSILON);

            let http = config.destination.to_http_config().expect("http destination");
            assert_eq!(http.url, "http://logs.internal/ingest");
            assert_eq!(http.timeout, Duration::from_millis(2500));
            assert_eq!(http.headers.get("X-Tenant").map(String::as_str), Some("acme"));

            let table = config.dispatch_table().map_err(|e| e.to_string())?;
            let rules = table.rules_for(500);
            assert_eq!(rules.len(), 2);
            assert_eq!(rules[0].action, Action::Retry);
            assert_eq!(rules[1].context.as_deref(), Some("server error"));

            let pool = config.to_pool_config();
            assert_eq!(pool.worker_count, 8);
            assert_eq!(pool.worker.destination, "http");
            Ok(())
        });
    }

    #[test]
    fn config_path_can_be_overridden() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "queue_capacity = 42")?;
            jail.set_env("SINKLINE_CONFIG", "custom.toml");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.queue_capacity, 42);
            Ok(())
        });
    }

    #[test]
    fn invalid_dispatch_rule_is_fatal() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sinkline.toml",
                r#"
                [[dispatch_rules]]
                status_code = 500
                action = "explode"
                "#,
            )?;

            let error = Config::load().expect_err("unknown action must fail");
            assert!(format!("{error:#}").contains("explode"));
            Ok(())
        });
    }

    #[test]
    fn out_of_range_status_code_is_fatal() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sinkline.toml",
                r#"
                [[dispatch_rules]]
                status_code = 700
                action = "drop"
                "#,
            )?;

            assert!(Config::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn zero_workers_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SINKLINE_WORKER_COUNT", "0");
            assert!(Config::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn zero_backoff_delays_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SINKLINE_REOPEN_DELAY_MS", "0");
            let error = Config::load().expect_err("zero reopen delay must fail");
            assert!(format!("{error:#}").contains("reopen_delay_ms"));
            Ok(())
        });

        let config = Config {
            retry: RetryConfig { base_delay_ms: 0, ..RetryConfig::default() },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_destination_requires_url() {
        let config = Config {
            destination: DestinationConfig::Http {
                url: String::new(),
                timeout_ms: 1000,
                user_agent: None,
                headers: HashMap::new(),
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
