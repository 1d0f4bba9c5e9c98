//! Variant job dispatcher.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, oneshot};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::{PromptSource, TRACING_TARGET, VariantInvoker};
use crate::cache::ResponseCache;
use crate::config::VariantConfig;
use crate::types::{JobId, PreparedInput, SlotIndex, VariantInput, VariantResult};

/// Outcome of starting a job.
///
/// A job is always returned. `first` is `None` only when the input or the
/// prompts could not be prepared and nothing was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedJob {
    /// Identifier of the new job.
    pub job_id: JobId,
    /// Earliest slot to complete.
    pub first: Option<VariantResult>,
}

impl StartedJob {
    fn without_result(job_id: JobId) -> Self {
        Self {
            job_id,
            first: None,
        }
    }
}

type SlotCall = BoxFuture<'static, VariantResult>;

/// Fans one input out into parallel invoker calls.
///
/// Calls of every job share one semaphore sized by `max_concurrent_calls`,
/// independent of the fan-out width, so unrelated jobs do not queue behind
/// each other while the pool has capacity.
#[derive(Clone)]
pub struct VariantDispatcher {
    cache: ResponseCache,
    invoker: Arc<dyn VariantInvoker>,
    limiter: Arc<Semaphore>,
    fan_out: usize,
    drains: TaskTracker,
}

impl fmt::Debug for VariantDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantDispatcher")
            .field("fan_out", &self.fan_out)
            .field("available_permits", &self.limiter.available_permits())
            .field("active_drains", &self.drains.len())
            .finish_non_exhaustive()
    }
}

impl VariantDispatcher {
    /// Creates a dispatcher writing into the given cache.
    pub fn new<I>(
        cache: ResponseCache,
        invoker: I,
        fan_out: usize,
        max_concurrent_calls: usize,
    ) -> Self
    where
        I: VariantInvoker + 'static,
    {
        Self::with_shared_invoker(cache, Arc::new(invoker), fan_out, max_concurrent_calls)
    }

    /// Creates a dispatcher from an invoker that is already shared.
    pub fn with_shared_invoker(
        cache: ResponseCache,
        invoker: Arc<dyn VariantInvoker>,
        fan_out: usize,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            cache,
            invoker,
            limiter: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
            fan_out: fan_out.max(1),
            drains: TaskTracker::new(),
        }
    }

    /// Creates a dispatcher from configuration.
    pub fn from_config(
        config: &VariantConfig,
        cache: ResponseCache,
        invoker: Arc<dyn VariantInvoker>,
    ) -> Self {
        Self::with_shared_invoker(cache, invoker, config.fan_out, config.max_concurrent_calls)
    }

    /// Returns the number of slots per job.
    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    /// Returns the cache results are written to.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Returns the number of jobs whose background drain is still running.
    pub fn active_drains(&self) -> usize {
        self.drains.len()
    }

    /// Starts a job and waits for its earliest slot.
    ///
    /// The input is prepared once and every prompt is submitted to the
    /// shared pool. The first call to finish, in whatever order the backend
    /// answers, is stored and returned. The remaining completions are written
    /// by a background drain that outlives this call, including when the
    /// caller stops waiting.
    ///
    /// Preparation or prompt failures still yield a job, closed with no slots
    /// and no first result, so regeneration reports it exhausted.
    #[tracing::instrument(
        skip_all,
        fields(fan_out = self.fan_out, input_len = input.len()),
        target = TRACING_TARGET
    )]
    pub async fn start_job<P>(&self, input: &VariantInput, prompts: &P) -> StartedJob
    where
        P: PromptSource + ?Sized,
    {
        let started_at = Timestamp::now();
        let job_id = JobId::new();
        self.cache.init(job_id, self.fan_out);

        let prepared = match input.prepare() {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    error = %err,
                    "Input preparation failed, returning job without variants"
                );
                return self.abandon(job_id);
            }
        };

        let prompts = match prompts.prompts(input, self.fan_out) {
            Ok(prompts) if prompts.len() == self.fan_out => prompts,
            Ok(prompts) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    expected = self.fan_out,
                    actual = prompts.len(),
                    "Prompt count does not match fan-out, returning job without variants"
                );
                return self.abandon(job_id);
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    error = %err,
                    "Prompt construction failed, returning job without variants"
                );
                return self.abandon(job_id);
            }
        };

        tracing::info!(
            target: TRACING_TARGET,
            job_id = %job_id,
            media_type = prepared.media_type(),
            "Dispatching variant job"
        );

        let calls = self.submit(job_id, &prepared, prompts);
        let (first_tx, first_rx) = oneshot::channel();
        let span = tracing::info_span!(target: TRACING_TARGET, "variant_drain", job_id = %job_id);
        self.drains
            .spawn(drain(self.cache.clone(), job_id, calls, first_tx).instrument(span));

        let first = match first_rx.await {
            Ok(first) => first,
            Err(_) => {
                tracing::error!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    "Drain ended before any slot completed"
                );
                return StartedJob::without_result(job_id);
            }
        };

        tracing::info!(
            target: TRACING_TARGET,
            job_id = %job_id,
            slot = %first.slot,
            has_response = !first.is_empty(),
            elapsed_ms = Timestamp::now().duration_since(started_at).as_millis(),
            "First variant ready"
        );

        StartedJob {
            job_id,
            first: Some(first),
        }
    }

    fn abandon(&self, job_id: JobId) -> StartedJob {
        self.cache.close(job_id);
        StartedJob::without_result(job_id)
    }

    /// Spawns one task per prompt and returns their completions.
    fn submit(
        &self,
        job_id: JobId,
        input: &PreparedInput,
        prompts: Vec<String>,
    ) -> FuturesUnordered<SlotCall> {
        prompts
            .into_iter()
            .enumerate()
            .map(|(position, prompt)| {
                let slot = SlotIndex::from_position(position);
                let call = run_slot(
                    Arc::clone(&self.invoker),
                    Arc::clone(&self.limiter),
                    input.clone(),
                    prompt,
                    job_id,
                    slot,
                );

                tokio::spawn(call)
                    .map(move |joined| {
                        joined.unwrap_or_else(|err| {
                            tracing::error!(
                                target: TRACING_TARGET,
                                job_id = %job_id,
                                slot = %slot,
                                error = %err,
                                "Variant task aborted"
                            );
                            VariantResult::empty(slot)
                        })
                    })
                    .boxed()
            })
            .collect()
    }

    /// Waits until every background drain started so far has finished.
    ///
    /// The dispatcher stays usable afterwards.
    pub async fn drained(&self) {
        self.drains.close();
        self.drains.wait().await;
        self.drains.reopen();
    }

    /// Waits for all background drains and stops tracking new ones.
    pub async fn shutdown(&self) {
        self.drains.close();

        tracing::info!(
            target: TRACING_TARGET,
            active_drains = self.drains.len(),
            "Waiting for variant drains to finish"
        );

        self.drains.wait().await;
    }
}

/// Runs one slot, converting every failure into a null payload.
async fn run_slot(
    invoker: Arc<dyn VariantInvoker>,
    limiter: Arc<Semaphore>,
    input: PreparedInput,
    prompt: String,
    job_id: JobId,
    slot: SlotIndex,
) -> VariantResult {
    let Ok(_permit) = limiter.acquire_owned().await else {
        tracing::error!(
            target: TRACING_TARGET,
            job_id = %job_id,
            slot = %slot,
            "Worker pool closed"
        );
        return VariantResult::empty(slot);
    };

    let started_at = Timestamp::now();
    let outcome = AssertUnwindSafe(invoker.invoke(&input, &prompt))
        .catch_unwind()
        .await;
    let elapsed_ms = Timestamp::now().duration_since(started_at).as_millis();

    let response = match outcome {
        Ok(Ok(Some(text))) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Ok(Ok(_)) => {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                slot = %slot,
                elapsed_ms,
                "Variant call returned no text"
            );
            None
        }
        Ok(Err(err)) => {
            tracing::warn!(
                target: TRACING_TARGET,
                job_id = %job_id,
                slot = %slot,
                error = %err,
                elapsed_ms,
                "Variant call failed"
            );
            None
        }
        Err(_) => {
            tracing::error!(
                target: TRACING_TARGET,
                job_id = %job_id,
                slot = %slot,
                elapsed_ms,
                "Variant call panicked"
            );
            None
        }
    };

    VariantResult::new(slot, response)
}

/// Stores every completion of a job, handing the earliest to the caller.
async fn drain(
    cache: ResponseCache,
    job_id: JobId,
    mut calls: FuturesUnordered<SlotCall>,
    first_tx: oneshot::Sender<VariantResult>,
) {
    let started_at = Timestamp::now();
    let total = calls.len();
    let mut first_tx = Some(first_tx);
    let mut failed = 0_usize;
    let mut dropped = 0_usize;

    while let Some(result) = calls.next().await {
        let slot = result.slot;
        if result.is_empty() {
            failed += 1;
        }

        let stored = match first_tx.take() {
            Some(first_tx) => {
                let stored = cache.put_result(job_id, result.clone());
                if first_tx.send(result).is_err() {
                    tracing::debug!(
                        target: TRACING_TARGET,
                        slot = %slot,
                        "Caller stopped waiting before the first variant"
                    );
                }
                stored
            }
            None => cache.put_result(job_id, result),
        };

        if !stored {
            dropped += 1;
        }

        tracing::trace!(
            target: TRACING_TARGET,
            slot = %slot,
            stored,
            "Variant result stored"
        );
    }

    tracing::info!(
        target: TRACING_TARGET,
        total,
        ready = total - failed,
        failed,
        dropped,
        elapsed_ms = Timestamp::now().duration_since(started_at).as_millis(),
        "Variant drain completed"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Result;
    use crate::dispatch::AnalysisMode;
    use crate::mock::{MockInvoker, MockReply, numbered_prompts};

    fn dispatcher(invoker: MockInvoker, fan_out: usize) -> VariantDispatcher {
        VariantDispatcher::new(ResponseCache::default(), invoker, fan_out, 16)
    }

    fn input() -> VariantInput {
        VariantInput::png(&b"fabric"[..])
    }

    /// Delays per slot so that completion order is 3, 5, 2, 6, 4, 1.
    fn staggered() -> MockInvoker {
        [(1, 60), (2, 30), (3, 10), (4, 50), (5, 20), (6, 40)]
            .into_iter()
            .fold(MockInvoker::new(), |mock, (slot, delay)| {
                mock.with_reply(
                    format!("prompt-{slot}"),
                    MockReply::text(format!("variant {slot}"))
                        .after(Duration::from_millis(delay)),
                )
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_result_is_earliest_completion() {
        let dispatcher = dispatcher(staggered(), 6);

        let started = dispatcher.start_job(&input(), &numbered_prompts).await;

        let first = started.first.expect("first variant");
        assert_eq!(first.slot.get(), 3);
        assert_eq!(first.text(), Some("variant 3"));
        assert!(dispatcher.cache().get(started.job_id, first.slot).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_fills_every_slot() {
        let invoker = staggered()
            .with_reply("prompt-2", MockReply::failure("quota").after(Duration::from_millis(30)))
            .with_reply("prompt-4", MockReply::panic().after(Duration::from_millis(50)));
        let dispatcher = dispatcher(invoker, 6);

        let started = dispatcher.start_job(&input(), &numbered_prompts).await;
        dispatcher.drained().await;

        for slot in SlotIndex::all(6) {
            let result = dispatcher
                .cache()
                .get(started.job_id, slot)
                .expect("every slot stored after drain");
            assert_eq!(result.is_empty(), matches!(slot.get(), 2 | 4));
        }
        assert_eq!(dispatcher.active_drains(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_slot_is_returned_as_null() {
        let invoker = MockInvoker::new()
            .with_default(MockReply::text("late").after(Duration::from_millis(100)))
            .with_reply("prompt-2", MockReply::failure("boom"));
        let dispatcher = dispatcher(invoker, 3);

        let started = dispatcher.start_job(&input(), &numbered_prompts).await;

        let first = started.first.expect("failed slot still completes first");
        assert_eq!(first.slot.get(), 2);
        assert!(first.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_returns_job_without_result() {
        let invoker = MockInvoker::new();
        let dispatcher = dispatcher(invoker.clone(), 6);

        let started = dispatcher
            .start_job(&VariantInput::png(bytes::Bytes::new()), &AnalysisMode::Short)
            .await;

        assert!(started.first.is_none());
        assert_eq!(dispatcher.cache().width(started.job_id), Some(0));
        assert_eq!(dispatcher.cache().ready_count(started.job_id), 0);
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_failure_returns_job_without_result() {
        let invoker = MockInvoker::new();
        let dispatcher = dispatcher(invoker.clone(), 6);
        let too_few = |_: &VariantInput, _: usize| -> Result<Vec<String>> {
            Ok(vec!["only one".to_owned()])
        };

        let started = dispatcher.start_job(&input(), &too_few).await;

        assert!(started.first.is_none());
        assert_eq!(dispatcher.cache().width(started.job_id), Some(0));
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_concurrent_calls() {
        let invoker =
            MockInvoker::new().with_default(MockReply::text("ok").after(Duration::from_millis(10)));
        let dispatcher = VariantDispatcher::new(ResponseCache::default(), invoker.clone(), 6, 2);

        let input = input();
        let first = dispatcher.start_job(&input, &numbered_prompts);
        let second = dispatcher.start_job(&input, &numbered_prompts);
        let (first, second) = tokio::join!(first, second);
        dispatcher.drained().await;

        assert!(first.first.is_some());
        assert!(second.first.is_some());
        assert_eq!(invoker.calls(), 12);
        assert!(invoker.peak_concurrency() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_survives_dropped_caller() {
        let dispatcher = dispatcher(staggered(), 6);
        let cache = dispatcher.cache().clone();

        let input = input();
        let start = dispatcher.start_job(&input, &numbered_prompts);
        let abandoned = tokio::time::timeout(Duration::from_millis(1), start).await;
        assert!(abandoned.is_err());

        dispatcher.drained().await;
        let job_ids = cache.job_ids();
        assert_eq!(job_ids.len(), 1);
        assert_eq!(cache.ready_count(job_ids[0]), 6);
    }
}
