//! Cache eviction policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_JOB_TTL_SECS, DEFAULT_MAX_JOBS};

/// Time- and count-based limits for cached jobs.
///
/// Jobs are evicted oldest first, either once they outlive `ttl` or when
/// admitting a new job would exceed `max_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Lifetime of a job, measured from its initialization.
    pub ttl: Duration,
    /// Maximum number of jobs held at once.
    pub max_jobs: usize,
}

impl EvictionPolicy {
    /// Creates a new eviction policy.
    pub fn new(ttl: Duration, max_jobs: usize) -> Self {
        Self {
            ttl,
            max_jobs: max_jobs.max(1),
        }
    }

    /// Returns true if a job created `age` ago has expired.
    #[inline]
    pub fn is_expired(&self, age: Duration) -> bool {
        age >= self.ttl
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_JOB_TTL_SECS), DEFAULT_MAX_JOBS)
    }
}
