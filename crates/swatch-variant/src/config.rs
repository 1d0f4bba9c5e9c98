//! Variant generation configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::cache::EvictionPolicy;
use crate::{Error, Result};

/// Default number of slots per job.
pub const DEFAULT_FAN_OUT: usize = 6;

/// Default number of invoker calls running at once across all jobs.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 12;

/// Default time an explicit-slot regeneration waits for its slot.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;

/// Default re-check cadence while waiting for a slot.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default lifetime of a job's cached results.
pub const DEFAULT_JOB_TTL_SECS: u64 = 3_600;

/// Default maximum number of jobs held in the cache.
pub const DEFAULT_MAX_JOBS: usize = 1_024;

/// Default interval between background eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Complete variant generation configuration.
///
/// The fan-out width and the worker pool are sized independently, so
/// concurrent jobs share the pool instead of queueing behind each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct VariantConfig {
    /// Number of independent variants generated per job.
    #[cfg_attr(
        feature = "config",
        arg(long = "fan-out", env = "SWATCH_FAN_OUT", default_value_t = DEFAULT_FAN_OUT)
    )]
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// Maximum analysis calls in flight across all jobs.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "max-concurrent-calls",
            env = "SWATCH_MAX_CONCURRENT_CALLS",
            default_value_t = DEFAULT_MAX_CONCURRENT_CALLS
        )
    )]
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// How long an explicit-slot regeneration waits, in milliseconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "poll-timeout-ms",
            env = "SWATCH_POLL_TIMEOUT_MS",
            default_value_t = DEFAULT_POLL_TIMEOUT_MS
        )
    )]
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Re-check cadence while waiting for a slot, in milliseconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "poll-interval-ms",
            env = "SWATCH_POLL_INTERVAL_MS",
            default_value_t = DEFAULT_POLL_INTERVAL_MS
        )
    )]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lifetime of a job's cached results, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "job-ttl-secs",
            env = "SWATCH_JOB_TTL_SECS",
            default_value_t = DEFAULT_JOB_TTL_SECS
        )
    )]
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    /// Maximum number of jobs kept in the cache.
    #[cfg_attr(
        feature = "config",
        arg(long = "max-jobs", env = "SWATCH_MAX_JOBS", default_value_t = DEFAULT_MAX_JOBS)
    )]
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// Interval between background eviction sweeps, in seconds.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "sweep-interval-secs",
            env = "SWATCH_SWEEP_INTERVAL_SECS",
            default_value_t = DEFAULT_SWEEP_INTERVAL_SECS
        )
    )]
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_fan_out() -> usize {
    DEFAULT_FAN_OUT
}

fn default_max_concurrent_calls() -> usize {
    DEFAULT_MAX_CONCURRENT_CALLS
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_job_ttl_secs() -> u64 {
    DEFAULT_JOB_TTL_SECS
}

fn default_max_jobs() -> usize {
    DEFAULT_MAX_JOBS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_FAN_OUT,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            job_ttl_secs: DEFAULT_JOB_TTL_SECS,
            max_jobs: DEFAULT_MAX_JOBS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl VariantConfig {
    /// Sets the number of slots per job.
    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Sets the worker pool bound.
    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls;
        self
    }

    /// Sets the explicit-slot wait timeout and re-check interval.
    pub fn with_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.poll_timeout_ms = duration_to_millis(timeout);
        self.poll_interval_ms = duration_to_millis(interval);
        self
    }

    /// Sets the cache eviction limits.
    pub fn with_eviction(mut self, job_ttl: Duration, max_jobs: usize) -> Self {
        self.job_ttl_secs = job_ttl.as_secs();
        self.max_jobs = max_jobs;
        self
    }

    /// Returns the explicit-slot wait timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Returns the re-check interval while waiting for a slot.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the interval between background eviction sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Returns the cache eviction policy.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(Duration::from_secs(self.job_ttl_secs), self.max_jobs)
    }

    /// Validates all configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any value is zero or the poll interval
    /// exceeds the poll timeout.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("fan_out", self.fan_out as u64),
            ("max_concurrent_calls", self.max_concurrent_calls as u64),
            ("poll_timeout_ms", self.poll_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("job_ttl_secs", self.job_ttl_secs),
            ("max_jobs", self.max_jobs as u64),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config(format!("{name} must be greater than 0")));
        }

        if self.poll_interval_ms > self.poll_timeout_ms {
            return Err(Error::config(format!(
                "poll_interval_ms ({}) must not exceed poll_timeout_ms ({})",
                self.poll_interval_ms, self.poll_timeout_ms
            )));
        }

        Ok(())
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = VariantConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fan_out, 6);
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_fan_out_is_rejected() {
        let config = VariantConfig::default().with_fan_out(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_interval_longer_than_timeout_is_rejected() {
        let config = VariantConfig::default()
            .with_polling(Duration::from_millis(100), Duration::from_millis(200));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() -> anyhow::Result<()> {
        let config: VariantConfig = serde_json::from_str(r#"{ "fan_out": 3 }"#)?;
        assert_eq!(config.fan_out, 3);
        assert_eq!(config.max_jobs, DEFAULT_MAX_JOBS);
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        Ok(())
    }
}
