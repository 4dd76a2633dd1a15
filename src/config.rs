//! Runtime configuration
//!
//! Every setting can be overridden with a `FINRISK_*` environment variable.
//! Unparseable values fall back to the default and are logged.

use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STALL_CHECK_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Which parts of the service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// HTTP API and workers in one process
    All,
    /// HTTP API only; jobs are left for worker processes
    Api,
    /// Workers only
    Worker,
}

impl ProcessRole {
    pub fn runs_api(self) -> bool {
        matches!(self, ProcessRole::All | ProcessRole::Api)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, ProcessRole::All | ProcessRole::Worker)
    }
}

impl FromStr for ProcessRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(ProcessRole::All),
            "api" => Ok(ProcessRole::Api),
            "worker" => Ok(ProcessRole::Worker),
            other => Err(AppError::Config(format!("Unknown process role: {}", other))),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Ingestion queue settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Largest batch a single upload may enqueue
    pub max_batch_size: usize,
    /// Total attempts per job, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt
    pub backoff_base: Duration,
    /// An active job whose lock is older than this is considered stalled
    pub stall_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    pub stall_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stall_check_interval: Duration::from_secs(DEFAULT_STALL_CHECK_INTERVAL_SECS),
        }
    }
}

/// Read path settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Serve from storage when the cache errors instead of failing the request
    pub fail_open: bool,
    pub page_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            fail_open: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub role: ProcessRole,
    pub server: ServerConfig,
    pub database_path: PathBuf,
    pub db_pool_size: u32,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    /// Directory for daily-rotated JSON logs; stdout only when unset
    pub log_dir: Option<PathBuf>,
    /// Problems found while loading, logged once logging is up
    pub warnings: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            role: ProcessRole::All,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_PORT,
            },
            database_path: PathBuf::from("finrisk.db"),
            db_pool_size: 8,
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
            log_dir: None,
            warnings: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut env = EnvReader::new(lookup);

        let role = match env.get("FINRISK_ROLE") {
            Some(value) => value.parse()?,
            None => defaults.role,
        };

        let config = Self {
            role,
            server: ServerConfig {
                host: env.get("FINRISK_HOST").unwrap_or(defaults.server.host),
                port: env.parse_or("FINRISK_PORT", defaults.server.port),
            },
            database_path: env
                .get("FINRISK_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            db_pool_size: env.parse_or("FINRISK_DB_POOL_SIZE", defaults.db_pool_size),
            queue: QueueConfig {
                max_batch_size: env.parse_or("FINRISK_MAX_BATCH_SIZE", defaults.queue.max_batch_size),
                max_attempts: env.parse_or("FINRISK_MAX_ATTEMPTS", defaults.queue.max_attempts),
                backoff_base: Duration::from_millis(
                    env.parse_or("FINRISK_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
                ),
                stall_timeout: Duration::from_secs(
                    env.parse_or("FINRISK_STALL_TIMEOUT_SECS", DEFAULT_STALL_TIMEOUT_SECS),
                ),
            },
            worker: WorkerConfig {
                concurrency: env.parse_or("FINRISK_WORKERS", defaults.worker.concurrency),
                poll_interval: Duration::from_millis(
                    env.parse_or("FINRISK_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
                ),
                stall_check_interval: Duration::from_secs(env.parse_or(
                    "FINRISK_STALL_CHECK_INTERVAL_SECS",
                    DEFAULT_STALL_CHECK_INTERVAL_SECS,
                )),
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(
                    env.parse_or("FINRISK_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
                ),
                fail_open: env
                    .get("FINRISK_CACHE_FAIL_OPEN")
                    .map(|s| s.trim().eq_ignore_ascii_case("true") || s.trim() == "1")
                    .unwrap_or(defaults.cache.fail_open),
                page_size: env.parse_or("FINRISK_PAGE_SIZE", defaults.cache.page_size),
            },
            log_dir: env
                .get("FINRISK_LOG_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            warnings: env.warnings,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the queue and read path cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".into()));
        }
        if self.queue.max_batch_size == 0 {
            return Err(AppError::Config("max_batch_size must be at least 1".into()));
        }
        if self.cache.page_size == 0 {
            return Err(AppError::Config("page_size must be at least 1".into()));
        }
        if self.role.runs_workers() && self.worker.concurrency == 0 {
            return Err(AppError::Config("worker concurrency must be at least 1".into()));
        }
        if self.role.runs_workers() && self.worker.stall_check_interval.is_zero() {
            return Err(AppError::Config("stall check interval must be positive".into()));
        }
        // A zero lease would let every sweep reclaim jobs that are still running
        if self.role.runs_workers() && self.queue.stall_timeout.is_zero() {
            return Err(AppError::Config("stall timeout must be positive".into()));
        }
        if self.db_pool_size == 0 {
            return Err(AppError::Config("db_pool_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Environment lookup that records unparsable values instead of failing
struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            warnings: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse_or<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + Copy + std::fmt::Debug,
    {
        match self.get(key) {
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    self.warnings.push(format!(
                        "Invalid value {:?} for {}, using default {:?}",
                        raw, key, default
                    ));
                    default
                }
            },
            None => default,
        }
    }
}
