//! Regeneration coordinator.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::served::ServedSet;
use super::{TRACING_TARGET, UsedId, normalize_used_ids};
use crate::cache::ResponseCache;
use crate::types::{JobId, SlotIndex, VariantResult};

/// Answer to a "next unseen variant" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextVariant {
    /// An unseen slot was ready and is now marked served.
    Ready(VariantResult),
    /// Unseen slots exist but none has completed yet. Retry later.
    Pending,
    /// Every slot has been served, or the job is no longer known.
    /// A fresh job is required.
    Exhausted,
}

impl NextVariant {
    /// Returns the ready result, if any.
    pub fn ready(self) -> Option<VariantResult> {
        match self {
            Self::Ready(result) => Some(result),
            Self::Pending | Self::Exhausted => None,
        }
    }
}

type SharedServedSet = Arc<Mutex<ServedSet>>;

/// Tracks which slots each client has seen and serves unseen ones from the
/// cache.
///
/// The registry lock is held only to look up a job's served set. Each served
/// set has its own lock, so requests for different jobs never contend. Locks
/// are always taken served set first, cache second.
#[derive(Clone)]
pub struct RegenerationCoordinator {
    cache: ResponseCache,
    served: Arc<Mutex<HashMap<JobId, SharedServedSet>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RegenerationCoordinator {
    /// Creates a coordinator reading from the given cache.
    pub fn new(cache: ResponseCache) -> Self {
        Self {
            cache,
            served: Arc::default(),
        }
    }

    /// Returns the cache results are read from.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn served_set(&self, job_id: JobId) -> SharedServedSet {
        Arc::clone(lock(&self.served).entry(job_id).or_default())
    }

    /// Records a slot as delivered to the client.
    pub fn mark_served(&self, job_id: JobId, slot: SlotIndex) {
        lock(&self.served_set(job_id)).insert(slot);
    }

    /// Merges slots the client reports as already seen into a job's history.
    ///
    /// Ignored for jobs the cache no longer holds.
    pub fn record_used(&self, job_id: JobId, used_ids: &[UsedId]) {
        let used = normalize_used_ids(used_ids);
        if used.is_empty() || !self.cache.contains(job_id) {
            return;
        }

        lock(&self.served_set(job_id)).extend(used);
    }

    /// Returns the slots of a job delivered so far, in ascending order.
    pub fn served(&self, job_id: JobId) -> Vec<SlotIndex> {
        let entry = lock(&self.served).get(&job_id).map(Arc::clone);
        entry.map(|set| lock(&set).to_vec()).unwrap_or_default()
    }

    /// Waits for one specific slot, up to `timeout`.
    ///
    /// Wakes on every write to the job and re-checks at least every
    /// `interval`. A found slot is marked served. Returns a result with a
    /// null response when the timeout elapses or the job is not known.
    #[tracing::instrument(
        skip_all,
        fields(job_id = %job_id, slot = %slot, timeout_ms = timeout.as_millis()),
        target = TRACING_TARGET
    )]
    pub async fn poll_slot(
        &self,
        job_id: JobId,
        slot: SlotIndex,
        timeout: Duration,
        interval: Duration,
    ) -> VariantResult {
        let deadline = Instant::now() + timeout;
        let interval = interval.max(Duration::from_millis(1));

        loop {
            let Some(notify) = self.cache.subscribe(job_id) else {
                tracing::debug!(target: TRACING_TARGET, "Job not in cache, returning sentinel");
                return VariantResult::empty(slot);
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.cache.get(job_id, slot) {
                self.mark_served(job_id, slot);
                tracing::debug!(
                    target: TRACING_TARGET,
                    has_response = !result.is_empty(),
                    "Requested slot ready"
                );
                return result;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::info!(
                    target: TRACING_TARGET,
                    timeout_ms = timeout.as_millis(),
                    "Timed out waiting for slot"
                );
                return VariantResult::empty(slot);
            }

            let wake_at = deadline.min(now + interval);
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Returns the lowest-numbered ready slot the client has not seen.
    ///
    /// `used_ids` reported by the client are merged into the served set
    /// first and never removed. A job that is unknown to the cache, for
    /// instance after eviction, is reported as exhausted.
    pub fn next_unseen(&self, job_id: JobId, used_ids: &[UsedId]) -> NextVariant {
        let Some(width) = self.cache.width(job_id) else {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                "Job not in cache, reporting exhausted"
            );
            return NextVariant::Exhausted;
        };

        let entry = self.served_set(job_id);
        let mut served = lock(&entry);
        served.extend(normalize_used_ids(used_ids));

        let ready = SlotIndex::all(width)
            .filter(|slot| !served.contains(*slot))
            .find_map(|slot| self.cache.get(job_id, slot));

        if let Some(result) = ready {
            served.insert(result.slot);
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                slot = %result.slot,
                has_response = !result.is_empty(),
                "Serving unseen variant"
            );
            return NextVariant::Ready(result);
        }

        if served.covers(width) {
            tracing::info!(
                target: TRACING_TARGET,
                job_id = %job_id,
                width,
                "All variants served"
            );
            NextVariant::Exhausted
        } else {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                "Unseen variants still pending"
            );
            NextVariant::Pending
        }
    }

    /// Drops the delivery history of a job.
    pub fn forget(&self, job_id: JobId) -> bool {
        lock(&self.served).remove(&job_id).is_some()
    }

    /// Drops the delivery history of every job the cache no longer holds.
    ///
    /// Returns the number of histories removed.
    pub fn prune(&self) -> usize {
        let mut served = lock(&self.served);
        let before = served.len();
        served.retain(|job_id, _| self.cache.contains(*job_id));
        let pruned = before - served.len();

        if pruned > 0 {
            tracing::debug!(target: TRACING_TARGET, pruned, "Pruned served sets");
        }

        pruned
    }

    /// Returns the number of jobs with a delivery history.
    pub fn tracked_jobs(&self) -> usize {
        lock(&self.served).len()
    }
}

impl fmt::Debug for RegenerationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegenerationCoordinator")
            .field("cache", &self.cache)
            .field("tracked_jobs", &self.tracked_jobs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: u32) -> SlotIndex {
        SlotIndex::new(index).expect("non-zero slot")
    }

    fn job_with(width: usize, ready: &[u32]) -> (RegenerationCoordinator, JobId) {
        let cache = ResponseCache::default();
        let job_id = JobId::new();
        cache.init(job_id, width);
        for index in ready {
            cache.put(job_id, slot(*index), Some(format!("variant {index}")));
        }
        (RegenerationCoordinator::new(cache), job_id)
    }

    fn next_slot(coordinator: &RegenerationCoordinator, job_id: JobId) -> Option<u32> {
        coordinator
            .next_unseen(job_id, &[])
            .ready()
            .map(|result| result.slot.get())
    }

    #[test]
    fn test_yields_unseen_in_ascending_order_then_exhausted() {
        let (coordinator, job_id) = job_with(6, &[1, 2, 3, 4, 5, 6]);
        coordinator.mark_served(job_id, slot(3));

        let yielded: Vec<_> = std::iter::from_fn(|| next_slot(&coordinator, job_id)).collect();

        assert_eq!(yielded, vec![1, 2, 4, 5, 6]);
        assert_eq!(coordinator.next_unseen(job_id, &[]), NextVariant::Exhausted);
    }

    #[test]
    fn test_call_after_n_is_exhausted() {
        let (coordinator, job_id) = job_with(3, &[1, 2, 3]);

        for _ in 0..3 {
            assert!(matches!(
                coordinator.next_unseen(job_id, &[]),
                NextVariant::Ready(_)
            ));
        }
        assert_eq!(coordinator.next_unseen(job_id, &[]), NextVariant::Exhausted);
        assert_eq!(coordinator.served(job_id).len(), 3);
    }

    #[test]
    fn test_unready_unseen_slots_are_pending() {
        let (coordinator, job_id) = job_with(4, &[2]);

        assert_eq!(next_slot(&coordinator, job_id), Some(2));
        assert_eq!(coordinator.next_unseen(job_id, &[]), NextVariant::Pending);

        coordinator.cache().put(job_id, slot(4), None);
        let late = coordinator.next_unseen(job_id, &[]).ready();
        assert_eq!(late, Some(VariantResult::empty(slot(4))));
    }

    #[test]
    fn test_used_ids_seed_served_set() {
        let (coordinator, job_id) = job_with(4, &[1, 2, 3, 4]);
        let used = [UsedId::from("1"), UsedId::from("r3"), UsedId::from("abc")];

        let next = coordinator.next_unseen(job_id, &used).ready();
        assert_eq!(next.map(|r| r.slot.get()), Some(2));
        assert_eq!(coordinator.served(job_id), vec![slot(1), slot(2), slot(3)]);
    }

    #[test]
    fn test_record_used_skips_unknown_jobs() {
        let (coordinator, job_id) = job_with(4, &[]);
        coordinator.record_used(job_id, &[UsedId::from("r2"), UsedId::Other]);
        assert_eq!(coordinator.served(job_id), vec![slot(2)]);

        let missing = JobId::new();
        coordinator.record_used(missing, &[UsedId::from(1)]);
        assert_eq!(coordinator.tracked_jobs(), 1);
    }

    #[test]
    fn test_used_ids_cover_all_slots() {
        let (coordinator, job_id) = job_with(2, &[]);
        let used = [UsedId::from(1), UsedId::from(2)];
        assert_eq!(coordinator.next_unseen(job_id, &used), NextVariant::Exhausted);
    }

    #[test]
    fn test_unknown_job_is_exhausted() {
        let coordinator = RegenerationCoordinator::new(ResponseCache::default());
        assert_eq!(
            coordinator.next_unseen(JobId::new(), &[]),
            NextVariant::Exhausted
        );
        assert_eq!(coordinator.tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_share_a_slot() -> anyhow::Result<()> {
        let (coordinator, job_id) = job_with(16, &(1..=16).collect::<Vec<_>>());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.next_unseen(job_id, &[]).ready() })
            })
            .collect();

        let mut slots = Vec::new();
        for handle in handles {
            slots.extend(handle.await?.map(|result| result.slot));
        }
        slots.sort();
        slots.dedup();

        assert_eq!(slots.len(), 16);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_sentinel_within_interval_of_timeout() {
        let (coordinator, job_id) = job_with(6, &[]);
        let timeout = Duration::from_millis(300);
        let interval = Duration::from_millis(70);

        let started = Instant::now();
        let result = coordinator.poll_slot(job_id, slot(5), timeout, interval).await;
        let waited = started.elapsed();

        assert_eq!(result, VariantResult::empty(slot(5)));
        assert!(waited >= timeout);
        assert!(waited <= timeout + interval);
        assert!(coordinator.served(job_id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wakes_on_write() -> anyhow::Result<()> {
        let (coordinator, job_id) = job_with(6, &[]);
        let cache = coordinator.cache().clone();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            cache.put(job_id, slot(2), Some("Herringbone wool".into()));
        });

        let started = Instant::now();
        let result = coordinator
            .poll_slot(
                job_id,
                slot(2),
                Duration::from_secs(30),
                Duration::from_secs(10),
            )
            .await;
        writer.await?;

        assert_eq!(result.text(), Some("Herringbone wool"));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(coordinator.served(job_id), vec![slot(2)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_poll_unknown_job_returns_immediately() {
        let coordinator = RegenerationCoordinator::new(ResponseCache::default());
        let result = coordinator
            .poll_slot(
                JobId::new(),
                slot(1),
                Duration::from_secs(30),
                Duration::from_millis(500),
            )
            .await;
        assert!(result.is_empty());
    }

    #[test]
    fn test_prune_drops_evicted_jobs() {
        let (coordinator, job_id) = job_with(2, &[1]);
        coordinator.mark_served(job_id, slot(1));
        coordinator.mark_served(JobId::new(), slot(1));

        assert_eq!(coordinator.prune(), 1);
        assert_eq!(coordinator.tracked_jobs(), 1);

        coordinator.cache().remove(job_id);
        assert_eq!(coordinator.prune(), 1);
        assert!(coordinator.served(job_id).is_empty());
    }
}
