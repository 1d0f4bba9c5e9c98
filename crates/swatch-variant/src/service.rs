//! Request-level facade over dispatch and regeneration.
//!
//! [`VariantService`] owns one cache, one dispatcher and one coordinator and
//! exposes the two client operations: starting an analysis and asking for
//! another variant. It also remembers each job's input so that an exhausted
//! job can be regenerated from scratch without a new upload.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::dispatch::{AnalysisMode, StartedJob, VariantDispatcher, VariantInvoker};
use crate::regenerate::{NextVariant, RegenerationCoordinator, UsedId};
use crate::types::{JobId, SlotIndex, VariantInput, VariantResult};
use crate::{Error, Result, VariantConfig};

/// Tracing target for service operations.
pub const TRACING_TARGET: &str = "swatch_variant::service";

/// Response to starting an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    /// Identifier to pass to later regeneration requests.
    pub job_id: JobId,
    /// Earliest variant, or `None` if the input could not be analysed.
    pub first: Option<VariantResult>,
}

impl From<StartedJob> for StartResponse {
    fn from(started: StartedJob) -> Self {
        Self {
            job_id: started.job_id,
            first: started.first,
        }
    }
}

/// Request for another variant of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerateRequest {
    /// Job returned by the start operation.
    pub job_id: JobId,
    /// Specific slot to wait for.
    #[serde(default, alias = "slot")]
    pub index: Option<u32>,
    /// Identifiers the client has already shown.
    #[serde(default)]
    pub used_ids: Vec<UsedId>,
    /// Starts a brand-new job from the same input.
    #[serde(default)]
    pub fresh: bool,
}

impl RegenerateRequest {
    /// Asks for the next unseen variant.
    pub fn next(job_id: JobId) -> Self {
        Self {
            job_id,
            index: None,
            used_ids: Vec::new(),
            fresh: false,
        }
    }

    /// Asks for one specific slot.
    pub fn slot(job_id: JobId, index: u32) -> Self {
        Self {
            index: Some(index),
            ..Self::next(job_id)
        }
    }

    /// Asks for a fresh generation round.
    pub fn fresh(job_id: JobId) -> Self {
        Self {
            fresh: true,
            ..Self::next(job_id)
        }
    }

    /// Reports identifiers the client has already shown.
    pub fn with_used_ids<I>(mut self, used_ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<UsedId>,
    {
        self.used_ids.extend(used_ids.into_iter().map(Into::into));
        self
    }
}

/// Why no variant could be returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnavailableReason {
    /// Unseen variants are still being generated.
    Pending,
    /// Every variant has been shown.
    Exhausted,
}

/// Body returned instead of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailable {
    /// Machine-readable reason.
    pub error: UnavailableReason,
    /// Human-readable guidance.
    pub message: String,
    /// Whether the client should retry with `fresh` set.
    #[serde(default)]
    pub fresh: bool,
}

impl Unavailable {
    /// Unseen variants are still running.
    pub fn pending() -> Self {
        Self {
            error: UnavailableReason::Pending,
            message: "More variants are still being generated. Try again shortly.".to_owned(),
            fresh: false,
        }
    }

    /// Every variant of the job has been shown.
    pub fn exhausted() -> Self {
        Self {
            error: UnavailableReason::Exhausted,
            message: "All variants for this job have been shown. \
                      Request a fresh generation to get new ones."
                .to_owned(),
            fresh: true,
        }
    }
}

/// Response to a regeneration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegenerateResponse {
    /// A new job was started.
    Fresh(StartResponse),
    /// No variant is available right now.
    Unavailable(Unavailable),
    /// A variant of the existing job.
    Variant(VariantResult),
}

impl RegenerateResponse {
    /// Returns the variant, if one was returned for the existing job.
    pub fn variant(&self) -> Option<&VariantResult> {
        match self {
            Self::Variant(result) => Some(result),
            Self::Fresh(_) | Self::Unavailable(_) => None,
        }
    }

    /// Returns the reason no variant was returned, if any.
    pub fn unavailable(&self) -> Option<UnavailableReason> {
        match self {
            Self::Unavailable(unavailable) => Some(unavailable.error),
            Self::Fresh(_) | Self::Variant(_) => None,
        }
    }
}

impl From<NextVariant> for RegenerateResponse {
    fn from(next: NextVariant) -> Self {
        match next {
            NextVariant::Ready(result) => Self::Variant(result),
            NextVariant::Pending => Self::Unavailable(Unavailable::pending()),
            NextVariant::Exhausted => Self::Unavailable(Unavailable::exhausted()),
        }
    }
}

/// Input kept per job for fresh regeneration.
#[derive(Clone)]
struct JobRecord {
    input: VariantInput,
    mode: AnalysisMode,
}

struct ServiceInner {
    config: VariantConfig,
    dispatcher: VariantDispatcher,
    coordinator: RegenerationCoordinator,
    records: Mutex<HashMap<JobId, JobRecord>>,
}

/// Variant generation service.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct VariantService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for VariantService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantService")
            .field("config", &self.inner.config)
            .field("dispatcher", &self.inner.dispatcher)
            .field("coordinator", &self.inner.coordinator)
            .finish_non_exhaustive()
    }
}

impl VariantService {
    /// Creates a service from configuration and an invoker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new<I>(config: VariantConfig, invoker: I) -> Result<Self>
    where
        I: VariantInvoker + 'static,
    {
        Self::with_shared_invoker(config, Arc::new(invoker))
    }

    /// Creates a service from an invoker that is already shared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_shared_invoker(
        config: VariantConfig,
        invoker: Arc<dyn VariantInvoker>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = ResponseCache::new(config.eviction_policy());
        let dispatcher = VariantDispatcher::from_config(&config, cache.clone(), invoker);
        let coordinator = RegenerationCoordinator::new(cache);

        tracing::info!(
            target: TRACING_TARGET,
            fan_out = config.fan_out,
            max_concurrent_calls = config.max_concurrent_calls,
            poll_timeout_ms = config.poll_timeout_ms,
            job_ttl_secs = config.job_ttl_secs,
            max_jobs = config.max_jobs,
            "Variant service created"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                dispatcher,
                coordinator,
                records: Mutex::default(),
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &VariantConfig {
        &self.inner.config
    }

    /// Returns the shared response cache.
    pub fn cache(&self) -> &ResponseCache {
        self.inner.dispatcher.cache()
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &VariantDispatcher {
        &self.inner.dispatcher
    }

    /// Returns the regeneration coordinator.
    pub fn coordinator(&self) -> &RegenerationCoordinator {
        &self.inner.coordinator
    }

    fn records(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts an analysis and returns its earliest variant.
    ///
    /// The returned variant counts as served. Never fails; an input that
    /// cannot be analysed yields a job without a first variant.
    pub async fn analyse(&self, input: VariantInput, mode: AnalysisMode) -> StartResponse {
        let started = self.inner.dispatcher.start_job(&input, &mode).await;

        if let Some(first) = &started.first {
            self.inner.coordinator.mark_served(started.job_id, first.slot);
        }

        let records = {
            let mut records = self.records();
            records.insert(started.job_id, JobRecord { input, mode });
            records.len()
        };

        if records > self.inner.config.max_jobs {
            self.prune_records();
        }

        tracing::info!(
            target: TRACING_TARGET,
            job_id = %started.job_id,
            mode = %mode,
            first_slot = started.first.as_ref().map(|first| first.slot.get()),
            "Analysis started"
        );

        started.into()
    }

    /// Serves a regeneration request.
    ///
    /// With `fresh` set, a new job is started from the remembered input.
    /// With an explicit index, waits up to the poll timeout for that slot.
    /// Otherwise answers with the next unseen variant, or with why there is
    /// none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero index and
    /// [`Error::UnknownJob`] for a fresh request on a job whose input is no
    /// longer remembered.
    pub async fn regenerate(&self, request: RegenerateRequest) -> Result<RegenerateResponse> {
        let RegenerateRequest {
            job_id,
            index,
            used_ids,
            fresh,
        } = request;

        if fresh {
            let record = self.records().get(&job_id).cloned();
            let Some(record) = record else {
                tracing::warn!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    "Fresh generation requested for unknown job"
                );
                return Err(Error::UnknownJob(job_id));
            };

            tracing::info!(
                target: TRACING_TARGET,
                previous_job_id = %job_id,
                "Starting fresh generation"
            );

            let started = self.analyse(record.input, record.mode).await;
            return Ok(RegenerateResponse::Fresh(started));
        }

        if let Some(index) = index {
            let slot = SlotIndex::try_from(index)?;
            self.inner.coordinator.record_used(job_id, &used_ids);
            return Ok(RegenerateResponse::Variant(self.wait_for_slot(job_id, slot).await));
        }

        let next = self.inner.coordinator.next_unseen(job_id, &used_ids);
        Ok(next.into())
    }

    async fn wait_for_slot(&self, job_id: JobId, slot: SlotIndex) -> VariantResult {
        let out_of_range = self
            .cache()
            .width(job_id)
            .is_some_and(|width| !slot.within(width));

        if out_of_range {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                slot = %slot,
                "Requested slot outside job width"
            );
            return VariantResult::empty(slot);
        }

        let config = &self.inner.config;
        self.inner
            .coordinator
            .poll_slot(job_id, slot, config.poll_timeout(), config.poll_interval())
            .await
    }

    /// Evicts expired jobs and drops bookkeeping for jobs no longer cached.
    ///
    /// Returns the number of evicted jobs.
    pub fn sweep(&self) -> usize {
        let evicted = self.cache().evict_expired().len();
        let pruned = self.inner.coordinator.prune();
        let forgotten = self.prune_records();

        if evicted + pruned + forgotten > 0 {
            tracing::debug!(
                target: TRACING_TARGET,
                evicted,
                pruned,
                forgotten,
                "Maintenance sweep completed"
            );
        }

        evicted
    }

    fn prune_records(&self) -> usize {
        let cache = self.cache();
        let mut records = self.records();
        let before = records.len();
        records.retain(|job_id, _| cache.contains(*job_id));
        before - records.len()
    }

    /// Spawns the periodic maintenance sweep.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let cancel_token = CancellationToken::new();
        let service = self.clone();
        let token = cancel_token.clone();
        let period = self.inner.config.sweep_interval();

        tracing::debug!(
            target: TRACING_TARGET,
            sweep_interval_secs = period.as_secs(),
            "Starting cache maintenance"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        service.sweep();
                    }
                }
            }

            tracing::debug!(target: TRACING_TARGET, "Cache maintenance stopped");
        });

        MaintenanceHandle {
            handle,
            cancel_token,
        }
    }

    /// Waits for every background drain to finish.
    pub async fn shutdown(&self) {
        self.inner.dispatcher.shutdown().await;
        tracing::info!(target: TRACING_TARGET, "Variant service stopped");
    }
}

/// Handle to the background maintenance task.
pub struct MaintenanceHandle {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl MaintenanceHandle {
    /// Stops the sweep loop after its current iteration.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Returns true once the sweep loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the sweep loop and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invocation`] if the task panicked.
    pub async fn stop(self) -> Result<()> {
        self.cancel_token.cancel();
        self.handle
            .await
            .map_err(|err| Error::invocation_with_source("maintenance task failed", err))
    }
}

impl fmt::Debug for MaintenanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceHandle")
            .field("finished", &self.handle.is_finished())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}
