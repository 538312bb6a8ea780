//! Runtime and worker pool configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, DrainBackoff};

/// Prefix for environment overrides read by [`RuntimeConfig::from_env`].
pub const ENV_PREFIX: &str = "ROARING_OFFLOAD_";

/// Configuration for the task runtime and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of pool threads.
    pub worker_count: usize,
    /// Maximum queued jobs before submission fails.
    pub max_queue_depth: usize,
    /// Stack size for pool threads, in bytes.
    pub thread_stack_size: usize,
    /// Default concurrency bound for parallel tasks.
    pub parallelism: usize,
    /// First drain sleep, in microseconds.
    pub drain_initial_backoff_us: u64,
    /// Cap for the doubling drain sleep, in milliseconds.
    pub drain_max_backoff_ms: u64,
    /// Force-complete tasks still queued after this many milliseconds of
    /// draining. `None` waits for every task.
    pub drain_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            worker_count: cpus,
            max_queue_depth: 1024,
            thread_stack_size: 2 * 1024 * 1024,
            parallelism: cpus,
            drain_initial_backoff_us: 50,
            drain_max_backoff_ms: 4,
            drain_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults sized to the detected CPU count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of pool threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the job queue bound.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the pool thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the default parallel task concurrency.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the drain timeout.
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout_ms = match timeout {
            Some(d) => Some(d.as_millis() as u64),
            None => None,
        };
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.parallelism == 0 {
            return Err("parallelism must be greater than 0".into());
        }
        if self.drain_initial_backoff_us == 0 {
            return Err("drain_initial_backoff_us must be greater than 0".into());
        }
        if self.drain_initial_backoff_us > self.drain_max_backoff_ms.saturating_mul(1000) {
            return Err("drain_initial_backoff_us must not exceed drain_max_backoff_ms".into());
        }
        Ok(())
    }

    /// Backoff schedule for the shutdown drain.
    #[must_use]
    pub fn drain_backoff(&self) -> DrainBackoff {
        DrainBackoff {
            initial: Duration::from_micros(self.drain_initial_backoff_us),
            max: Duration::from_millis(self.drain_max_backoff_ms),
            timeout: self.drain_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a message for malformed JSON or invalid values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from defaults overridden by `ROARING_OFFLOAD_*` variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Some(v) = env_var("WORKER_COUNT")? {
            cfg.worker_count = v;
        }
        if let Some(v) = env_var("MAX_QUEUE_DEPTH")? {
            cfg.max_queue_depth = v;
        }
        if let Some(v) = env_var("THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }
        if let Some(v) = env_var("PARALLELISM")? {
            cfg.parallelism = v;
        }
        if let Some(v) = env_var("DRAIN_INITIAL_BACKOFF_US")? {
            cfg.drain_initial_backoff_us = v;
        }
        if let Some(v) = env_var("DRAIN_MAX_BACKOFF_MS")? {
            cfg.drain_max_backoff_ms = v;
        }
        if let Some(v) = env_var("DRAIN_TIMEOUT_MS")? {
            cfg.drain_timeout_ms = Some(v);
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_var<T>(name: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{name}");
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("cannot read {key}")),
    }
}
