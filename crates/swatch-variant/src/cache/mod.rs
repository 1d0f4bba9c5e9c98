//! In-process store of per-job variant results.
//!
//! The [`ResponseCache`] is the single source of truth for slot results. It is
//! written by the dispatcher as calls complete and read by the regeneration
//! coordinator. Every operation holds one mutex for constant time; no I/O or
//! model call ever happens under the lock.
//!
//! Each job carries a [`Notify`] that is signalled on every write, so waiters
//! are woken as soon as a slot lands instead of re-checking on a timer.

mod policy;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use policy::EvictionPolicy;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::types::{JobId, SlotIndex, VariantResult};

/// Tracing target for cache operations.
pub const TRACING_TARGET: &str = "swatch_variant::cache";

/// Thread-safe, cloneable store mapping `(job, slot)` to a variant result.
///
/// All clones share the same underlying state.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    state: Mutex<CacheState>,
    policy: EvictionPolicy,
}

#[derive(Default)]
struct CacheState {
    buckets: HashMap<JobId, Bucket>,
    /// Insertion order of buckets; entries whose generation no longer
    /// matches the live bucket are skipped.
    order: VecDeque<(JobId, u64)>,
    next_generation: u64,
}

struct Bucket {
    width: usize,
    slots: HashMap<SlotIndex, Option<String>>,
    generation: u64,
    created_at: Instant,
    notify: Arc<Notify>,
}

impl CacheState {
    /// Pops buckets off the front of the queue while they are expired or
    /// while `incoming` new buckets would not fit.
    fn evict(
        &mut self,
        policy: &EvictionPolicy,
        now: Instant,
        incoming: usize,
    ) -> Vec<(JobId, Arc<Notify>)> {
        let mut evicted = Vec::new();

        while let Some(&(job_id, generation)) = self.order.front() {
            let Some(bucket) = self
                .buckets
                .get(&job_id)
                .filter(|bucket| bucket.generation == generation)
            else {
                self.order.pop_front();
                continue;
            };

            let expired = policy.is_expired(now.saturating_duration_since(bucket.created_at));
            let over_capacity = self.buckets.len() + incoming > policy.max_jobs;
            if !expired && !over_capacity {
                break;
            }

            self.order.pop_front();
            if let Some(bucket) = self.buckets.remove(&job_id) {
                evicted.push((job_id, bucket.notify));
            }
        }

        evicted
    }
}

impl ResponseCache {
    /// Creates an empty cache with the given eviction policy.
    pub fn new(policy: EvictionPolicy) -> Self {
        tracing::debug!(
            target: TRACING_TARGET,
            ttl_secs = policy.ttl.as_secs(),
            max_jobs = policy.max_jobs,
            "Response cache created"
        );

        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                policy,
            }),
        }
    }

    /// Returns the eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.inner.policy
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an empty bucket for a job of the given width.
    ///
    /// Calling it again for an existing job discards the results stored so
    /// far. Expired jobs, and the oldest jobs beyond capacity, are evicted
    /// first.
    pub fn init(&self, job_id: JobId, width: usize) {
        let now = Instant::now();

        let (replaced, evicted) = {
            let mut state = self.lock();
            let incoming = usize::from(!state.buckets.contains_key(&job_id));
            let evicted = state.evict(&self.inner.policy, now, incoming);

            let generation = state.next_generation;
            state.next_generation += 1;
            state.order.push_back((job_id, generation));

            let bucket = Bucket {
                width,
                slots: HashMap::with_capacity(width),
                generation,
                created_at: now,
                notify: Arc::new(Notify::new()),
            };

            let replaced = state.buckets.insert(job_id, bucket);
            (replaced.map(|bucket| bucket.notify), evicted)
        };

        if let Some(notify) = replaced {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                "Existing job bucket reset"
            );
            notify.notify_waiters();
        }

        Self::wake_evicted(evicted, "capacity or ttl");

        tracing::trace!(
            target: TRACING_TARGET,
            job_id = %job_id,
            width,
            "Job bucket initialized"
        );
    }

    /// Stores the result of one slot, overwriting any previous value.
    ///
    /// Returns `false` if the job is unknown, either because it was never
    /// initialized or because it has been evicted; the write is dropped.
    pub fn put(&self, job_id: JobId, slot: SlotIndex, response: Option<String>) -> bool {
        let notify = self.lock().buckets.get_mut(&job_id).map(|bucket| {
            bucket.slots.insert(slot, response);
            Arc::clone(&bucket.notify)
        });

        let Some(notify) = notify else {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                slot = %slot,
                "Dropping result for unknown job"
            );
            return false;
        };

        notify.notify_waiters();
        true
    }

    /// Stores a complete [`VariantResult`].
    pub fn put_result(&self, job_id: JobId, result: VariantResult) -> bool {
        self.put(job_id, result.slot, result.response)
    }

    /// Returns the stored result of a slot.
    ///
    /// `None` covers both an unknown job and a slot that has not been
    /// produced yet.
    pub fn get(&self, job_id: JobId, slot: SlotIndex) -> Option<VariantResult> {
        let state = self.lock();
        let response = state.buckets.get(&job_id)?.slots.get(&slot)?.clone();
        Some(VariantResult::new(slot, response))
    }

    /// Marks a job as producing no results by shrinking its width to zero.
    ///
    /// The job keeps its place in the eviction queue. Waiters are woken so
    /// they observe the new width. Returns `false` if the job is unknown.
    pub fn close(&self, job_id: JobId) -> bool {
        let notify = self.lock().buckets.get_mut(&job_id).map(|bucket| {
            bucket.width = 0;
            bucket.slots.clear();
            Arc::clone(&bucket.notify)
        });

        let Some(notify) = notify else {
            return false;
        };

        tracing::debug!(target: TRACING_TARGET, job_id = %job_id, "Job closed without results");
        notify.notify_waiters();
        true
    }

    /// Returns the fan-out width a job was initialized with.
    pub fn width(&self, job_id: JobId) -> Option<usize> {
        self.lock().buckets.get(&job_id).map(|bucket| bucket.width)
    }

    /// Returns true if the job is currently held by the cache.
    pub fn contains(&self, job_id: JobId) -> bool {
        self.lock().buckets.contains_key(&job_id)
    }

    /// Returns the number of slots of a job that hold a result.
    pub fn ready_count(&self, job_id: JobId) -> usize {
        self.lock()
            .buckets
            .get(&job_id)
            .map_or(0, |bucket| bucket.slots.len())
    }

    /// Returns the write notifier of a job.
    pub(crate) fn subscribe(&self, job_id: JobId) -> Option<Arc<Notify>> {
        self.lock()
            .buckets
            .get(&job_id)
            .map(|bucket| Arc::clone(&bucket.notify))
    }

    /// Removes a job and its results.
    pub fn remove(&self, job_id: JobId) -> bool {
        let removed = self.lock().buckets.remove(&job_id);
        match removed {
            Some(bucket) => {
                bucket.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Evicts every job that has outlived the policy's TTL.
    ///
    /// Returns the identifiers of the evicted jobs.
    pub fn evict_expired(&self) -> Vec<JobId> {
        let now = Instant::now();
        let evicted = self.lock().evict(&self.inner.policy, now, 0);
        let job_ids = evicted.iter().map(|(job_id, _)| *job_id).collect();
        Self::wake_evicted(evicted, "ttl");
        job_ids
    }

    fn wake_evicted(evicted: Vec<(JobId, Arc<Notify>)>, reason: &'static str) {
        if evicted.is_empty() {
            return;
        }

        tracing::debug!(
            target: TRACING_TARGET,
            evicted = evicted.len(),
            reason,
            "Evicted cached jobs"
        );

        for (_, notify) in evicted {
            notify.notify_waiters();
        }
    }

    /// Returns the identifiers of every job held, oldest first.
    pub fn job_ids(&self) -> Vec<JobId> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter(|(job_id, generation)| {
                state
                    .buckets
                    .get(job_id)
                    .is_some_and(|bucket| bucket.generation == *generation)
            })
            .map(|(job_id, _)| *job_id)
            .collect()
    }

    /// Returns the number of jobs held.
    pub fn len(&self) -> usize {
        self.lock().buckets.len()
    }

    /// Returns true if no job is held.
    pub fn is_empty(&self) -> bool {
        self.lock().buckets.is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("policy", &self.inner.policy)
            .field("jobs", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn slot(index: u32) -> SlotIndex {
        SlotIndex::new(index).expect("non-zero slot")
    }

    #[test]
    fn test_get_before_put_is_not_found() {
        let cache = ResponseCache::default();
        let job_id = JobId::new();

        assert!(cache.get(job_id, slot(1)).is_none());

        cache.init(job_id, 6);
        assert!(cache.get(job_id, slot(1)).is_none());
        assert_eq!(cache.width(job_id), Some(6));
    }

    #[test]
    fn test_put_then_get() {
        let cache = ResponseCache::default();
        let job_id = JobId::new();
        cache.init(job_id, 6);

        assert!(cache.put(job_id, slot(2), Some("Linen weave".into())));
        assert!(cache.put(job_id, slot(4), None));

        let ready = cache.get(job_id, slot(2)).expect("slot 2 stored");
        assert_eq!(ready.text(), Some("Linen weave"));

        let failed = cache.get(job_id, slot(4)).expect("slot 4 stored");
        assert!(failed.is_empty());
        assert_eq!(cache.ready_count(job_id), 2);
    }

    #[test]
    fn test_put_for_unknown_job_is_dropped() {
        let cache = ResponseCache::default();
        let job_id = JobId::new();

        assert!(!cache.put(job_id, slot(1), Some("text".into())));
        assert!(!cache.contains(job_id));
    }

    #[test]
    fn test_close_empties_job() {
        let cache = ResponseCache::default();
        let job_id = JobId::new();
        cache.init(job_id, 6);
        cache.put(job_id, slot(2), Some("text".into()));

        assert!(cache.close(job_id));
        assert_eq!(cache.width(job_id), Some(0));
        assert_eq!(cache.ready_count(job_id), 0);
        assert!(!cache.close(JobId::new()));
    }

    #[test]
    fn test_init_again_clears_results() {
        let cache = ResponseCache::default();
        let job_id = JobId::new();
        cache.init(job_id, 6);
        cache.put(job_id, slot(1), Some("first".into()));

        cache.init(job_id, 6);
        assert!(cache.get(job_id, slot(1)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_job() {
        let cache = ResponseCache::new(EvictionPolicy::new(Duration::from_secs(60), 2));
        let first = JobId::new();
        let second = JobId::new();
        let third = JobId::new();

        cache.init(first, 6);
        cache.init(second, 6);
        cache.init(third, 6);

        assert!(!cache.contains(first));
        assert!(cache.contains(second));
        assert!(cache.contains(third));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinit_does_not_count_twice() {
        let cache = ResponseCache::new(EvictionPolicy::new(Duration::from_secs(60), 2));
        let first = JobId::new();
        let second = JobId::new();

        cache.init(first, 6);
        cache.init(second, 6);
        cache.init(second, 6);

        assert!(cache.contains(first));
        assert!(cache.contains(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_jobs_are_swept() {
        let cache = ResponseCache::new(EvictionPolicy::new(Duration::from_secs(10), 16));
        let old = JobId::new();
        cache.init(old, 6);

        tokio::time::advance(Duration::from_secs(6)).await;
        let young = JobId::new();
        cache.init(young, 6);

        tokio::time::advance(Duration::from_secs(5)).await;
        let evicted = cache.evict_expired();

        assert_eq!(evicted, vec![old]);
        assert!(cache.contains(young));
    }

    #[tokio::test]
    async fn test_concurrent_writers_across_slots() -> anyhow::Result<()> {
        let cache = ResponseCache::default();
        let job_id = JobId::new();
        cache.init(job_id, 32);

        let handles: Vec<_> = SlotIndex::all(32)
            .map(|slot| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.put(job_id, slot, Some(slot.to_string())) })
            })
            .collect();

        for handle in handles {
            assert!(handle.await?);
        }

        assert_eq!(cache.ready_count(job_id), 32);
        Ok(())
    }

    #[tokio::test]
    async fn test_put_wakes_subscribers() -> anyhow::Result<()> {
        let cache = ResponseCache::default();
        let job_id = JobId::new();
        cache.init(job_id, 6);

        let notify = cache.subscribe(job_id).expect("job registered");
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        cache.put(job_id, slot(3), Some("Silk".into()));
        tokio::time::timeout(Duration::from_secs(1), notified).await?;
        Ok(())
    }
}
