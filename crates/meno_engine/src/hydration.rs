use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use meno_core::{
    update, CompletionState, Effect, GenerationRequest, GenerationRun, ItemId, Recipe,
    RecipeSummary, RegistryView, RunId, RunMsg, RunRegistry, UserPreferences,
};
use meno_logging::{meno_debug, meno_error, meno_info, meno_warn};

use crate::cache::HydrationCache;
use crate::collaborators::{ItemCompleter, NullProgressSink, ProgressSink, SummaryGenerator};
use crate::settings::{system_clock, Clock, HydrationSettings};
use crate::{EngineError, EngineEvent, HydrationReport, StaleResult};

/// Identifies one hydration attempt of one run. Only the latest token issued
/// for a run may write results into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HydrationToken(u64);

pub struct HydrationEngineBuilder {
    summaries: Arc<dyn SummaryGenerator>,
    completer: Arc<dyn ItemCompleter>,
    settings: HydrationSettings,
    cache: HydrationCache,
    clock: Clock,
    sink: Arc<dyn ProgressSink>,
}

impl HydrationEngineBuilder {
    pub fn settings(mut self, settings: HydrationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a cache with other engines.
    pub fn cache(mut self, cache: HydrationCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> HydrationEngine {
        HydrationEngine {
            inner: Arc::new(EngineInner {
                summaries: self.summaries,
                completer: self.completer,
                settings: self.settings,
                cache: self.cache,
                clock: self.clock,
                sink: self.sink,
                state: Mutex::new(EngineState::default()),
                emit_order: Mutex::new(()),
                next_run_id: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
            }),
        }
    }
}

/// Owns every generation run of the session and hydrates them.
///
/// Cloning is cheap; clones drive the same runs.
#[derive(Clone)]
pub struct HydrationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    summaries: Arc<dyn SummaryGenerator>,
    completer: Arc<dyn ItemCompleter>,
    settings: HydrationSettings,
    cache: HydrationCache,
    clock: Clock,
    sink: Arc<dyn ProgressSink>,
    state: Mutex<EngineState>,
    /// Taken before `state` is released so events leave in transition order.
    emit_order: Mutex<()>,
    next_run_id: AtomicU64,
    next_token: AtomicU64,
}

#[derive(Default)]
struct EngineState {
    registry: RunRegistry,
    tokens: HashMap<RunId, HydrationToken>,
}

/// Everything a worker needs, captured when hydration starts.
struct HydrationJob {
    run_id: RunId,
    token: HydrationToken,
    fingerprint: String,
    request: GenerationRequest,
    preferences: UserPreferences,
    summaries: HashMap<ItemId, RecipeSummary>,
    pending: Vec<ItemId>,
    cursor: AtomicUsize,
}

impl HydrationJob {
    /// Claim the next pending item; every index is handed out once.
    fn claim(&self) -> Option<&ItemId> {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.pending.get(index)
    }
}

impl HydrationEngine {
    pub fn builder(
        summaries: Arc<dyn SummaryGenerator>,
        completer: Arc<dyn ItemCompleter>,
    ) -> HydrationEngineBuilder {
        HydrationEngineBuilder {
            summaries,
            completer,
            settings: HydrationSettings::default(),
            cache: HydrationCache::new(),
            clock: system_clock(),
            sink: Arc::new(NullProgressSink),
        }
    }

    pub fn cache(&self) -> &HydrationCache {
        &self.inner.cache
    }

    /// Fetch summaries and register a new run with every item pending.
    pub async fn start_run(
        &self,
        request: GenerationRequest,
        preferences: UserPreferences,
    ) -> Result<RunId, EngineError> {
        let count = self.inner.settings.summary_count;
        let summaries = self
            .inner
            .summaries
            .generate(&preferences, &request, count)
            .await
            .map_err(|err| {
                meno_warn!("Summary generation failed: {}", err);
                EngineError::Upstream(err)
            })?;

        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let run = GenerationRun::new(
            run_id,
            (self.inner.clock)(),
            request,
            preferences,
            summaries,
        );
        meno_info!(
            "Run {} created with {} item(s) fingerprint={}",
            run_id,
            run.items().len(),
            run.request_fingerprint()
        );

        let mut state = self.lock_state();
        let events = apply_locked(&mut state, &self.inner.next_token, RunMsg::RunCreated(run));
        self.publish(state, events);
        Ok(run_id)
    }

    /// Hydrate every pending item of the run with a fresh token.
    ///
    /// Any hydration already in flight for the run stops writing. Resolves once
    /// every worker has returned.
    pub async fn hydrate_run(&self, run_id: RunId) -> Result<HydrationReport, EngineError> {
        let job = {
            let mut state = self.lock_state();
            let Some(run) = state.registry.run(run_id) else {
                return Err(EngineError::UnknownRun(run_id));
            };
            let pending = run.pending_item_ids();
            let summaries = run
                .items()
                .iter()
                .filter(|summary| pending.contains(&summary.id))
                .map(|summary| (summary.id.clone(), summary.clone()))
                .collect();
            let token = self.next_token();
            let job = Arc::new(HydrationJob {
                run_id,
                token,
                fingerprint: run.request_fingerprint().to_string(),
                request: run.request().clone(),
                preferences: run.preferences().clone(),
                summaries,
                pending,
                cursor: AtomicUsize::new(0),
            });
            state.tokens.insert(run_id, token);
            let events = apply_locked(
                &mut state,
                &self.inner.next_token,
                RunMsg::HydrationStarted { run_id },
            );
            self.publish(state, events);
            job
        };

        let workers = self
            .inner
            .settings
            .concurrency
            .max(1)
            .min(job.pending.len());
        meno_info!(
            "Hydrating run {} with {} worker(s) over {} pending item(s)",
            run_id,
            workers,
            job.pending.len()
        );

        let handles = (0..workers).map(|_| {
            let engine = self.clone();
            let job = Arc::clone(&job);
            tokio::spawn(async move { engine.run_worker(job).await })
        });

        let mut report = HydrationReport {
            workers,
            ..HydrationReport::default()
        };
        for outcome in join_all(handles).await {
            match outcome {
                Ok(part) => report.merge(part),
                Err(err) => meno_error!("Hydration worker for run {} failed: {}", run_id, err),
            }
        }
        meno_debug!("Hydration of run {} finished: {:?}", run_id, report);
        Ok(report)
    }

    /// Reset failed items to pending and hydrate them again.
    pub async fn retry_failed_items(&self, run_id: RunId) -> Result<HydrationReport, EngineError> {
        {
            let mut state = self.lock_state();
            if state.registry.run(run_id).is_none() {
                return Err(EngineError::UnknownRun(run_id));
            }
            let events = apply_locked(
                &mut state,
                &self.inner.next_token,
                RunMsg::FailedItemsReset { run_id },
            );
            self.publish(state, events);
        }
        self.hydrate_run(run_id).await
    }

    /// Stop in-flight workers of the run from writing. Completer calls already
    /// running are not aborted; their results are dropped.
    pub fn cancel_run_hydration(&self, run_id: RunId) -> bool {
        let mut state = self.lock_state();
        if state.registry.run(run_id).is_none() {
            return false;
        }
        state.tokens.insert(run_id, self.next_token());
        meno_info!("Hydration of run {} cancelled", run_id);
        self.publish(state, vec![EngineEvent::HydrationCancelled { run_id }]);
        true
    }

    pub fn remove_run(&self, run_id: RunId) -> bool {
        self.apply_removal(RunMsg::RunRemoved { run_id }, run_id, None)
    }

    /// Remove one item; the run goes away with its last item.
    pub fn remove_item_from_run(&self, run_id: RunId, item_id: &str) -> bool {
        self.apply_removal(
            RunMsg::ItemRemoved {
                run_id,
                item_id: item_id.to_string(),
            },
            run_id,
            Some(item_id),
        )
    }

    pub fn run(&self, run_id: RunId) -> Option<GenerationRun> {
        self.lock_state().registry.run(run_id).cloned()
    }

    /// Snapshot of every run, newest first.
    pub fn runs(&self) -> Vec<GenerationRun> {
        self.lock_state().registry.runs().to_vec()
    }

    pub fn item_content(&self, run_id: RunId, item_id: &str) -> Option<Recipe> {
        self.lock_state()
            .registry
            .run(run_id)
            .and_then(|run| run.content(item_id).cloned())
    }

    pub fn view(&self) -> RegistryView {
        self.lock_state().registry.view()
    }

    fn apply_removal(&self, msg: RunMsg, run_id: RunId, item_id: Option<&str>) -> bool {
        let mut state = self.lock_state();
        let removed = match (state.registry.run(run_id), item_id) {
            (Some(run), Some(item_id)) => run.status(item_id).is_some(),
            (Some(_), None) => true,
            (None, _) => false,
        };
        let events = apply_locked(&mut state, &self.inner.next_token, msg);
        if removed {
            meno_info!("Removed {} from run {}", item_id.unwrap_or("run"), run_id);
        }
        self.publish(state, events);
        removed
    }

    async fn run_worker(&self, job: Arc<HydrationJob>) -> HydrationReport {
        let mut report = HydrationReport::default();

        while let Some(item_id) = job.claim() {
            if !self.is_current(&job) {
                meno_debug!("Worker for run {} stopping: token superseded", job.run_id);
                report.superseded = true;
                break;
            }
            let Some(summary) = job.summaries.get(item_id) else {
                continue;
            };

            if let Some(cached) = self.inner.cache.get(&job.fingerprint, item_id) {
                match self.commit_ready(&job, item_id, cached, false) {
                    Ok(()) => {
                        meno_debug!("Run {} item {} served from cache", job.run_id, item_id);
                        report.cached += 1;
                        continue;
                    }
                    Err(stale) => {
                        meno_debug!("Discarding cached item {}: {}", item_id, stale);
                        report.discarded += 1;
                        report.superseded = true;
                        break;
                    }
                }
            }

            let result = self
                .inner
                .completer
                .complete(&job.preferences, &job.request, summary)
                .await;

            let committed = match result {
                Ok(recipe) => {
                    let normalized = Recipe {
                        id: item_id.clone(),
                        completion_state: CompletionState::Full,
                        ..recipe
                    };
                    self.commit_ready(&job, item_id, normalized, true)
                        .map(|()| report.hydrated += 1)
                }
                Err(err) => {
                    meno_warn!("Run {} item {} failed: {}", job.run_id, item_id, err);
                    self.commit_failed(&job, item_id, err.message)
                        .map(|()| report.failed += 1)
                }
            };

            if let Err(stale) = committed {
                meno_debug!("Discarding result for item {}: {}", item_id, stale);
                report.discarded += 1;
                report.superseded = true;
                break;
            }
        }

        report
    }

    fn is_current(&self, job: &HydrationJob) -> bool {
        self.lock_state().tokens.get(&job.run_id) == Some(&job.token)
    }

    /// Token check, cache insert and registry write happen under one lock.
    fn commit_ready(
        &self,
        job: &HydrationJob,
        item_id: &str,
        content: Recipe,
        cache: bool,
    ) -> Result<(), StaleResult> {
        let mut state = self.lock_state();
        if state.tokens.get(&job.run_id) != Some(&job.token) {
            return Err(StaleResult { run_id: job.run_id });
        }
        if cache {
            self.inner
                .cache
                .insert(&job.fingerprint, item_id, content.clone());
        }
        let events = apply_locked(
            &mut state,
            &self.inner.next_token,
            RunMsg::ItemHydrated {
                run_id: job.run_id,
                item_id: item_id.to_string(),
                content,
            },
        );
        self.publish(state, events);
        Ok(())
    }

    fn commit_failed(
        &self,
        job: &HydrationJob,
        item_id: &str,
        message: String,
    ) -> Result<(), StaleResult> {
        let mut state = self.lock_state();
        if state.tokens.get(&job.run_id) != Some(&job.token) {
            return Err(StaleResult { run_id: job.run_id });
        }
        let events = apply_locked(
            &mut state,
            &self.inner.next_token,
            RunMsg::ItemFailed {
                run_id: job.run_id,
                item_id: item_id.to_string(),
                message,
            },
        );
        self.publish(state, events);
        Ok(())
    }

    fn next_token(&self) -> HydrationToken {
        issue_token(&self.inner.next_token)
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the state lock and emit the events of the transition it
    /// guarded. Emission order follows transition order across workers; a
    /// sink must not call back into the engine.
    fn publish(&self, state: MutexGuard<'_, EngineState>, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        let _order = self
            .inner
            .emit_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
        for event in events {
            self.inner.sink.emit(event);
        }
    }
}

fn issue_token(counter: &AtomicU64) -> HydrationToken {
    HydrationToken(counter.fetch_add(1, Ordering::Relaxed))
}

/// Run a message through the registry and carry out its effects on the token
/// table. A token is drawn from `tokens` only when a surviving run is
/// cancelled.
fn apply_locked(state: &mut EngineState, tokens: &AtomicU64, msg: RunMsg) -> Vec<EngineEvent> {
    let registry = std::mem::take(&mut state.registry);
    let (registry, effects) = update(registry, msg);
    state.registry = registry;

    let mut events = Vec::with_capacity(effects.len());
    for effect in effects {
        match effect {
            Effect::CancelHydration { run_id } => {
                if state.registry.run(run_id).is_some() {
                    state.tokens.insert(run_id, issue_token(tokens));
                } else {
                    state.tokens.remove(&run_id);
                }
                events.push(EngineEvent::HydrationCancelled { run_id });
            }
            Effect::StageChanged { run_id, stage } => {
                events.push(EngineEvent::RunStageChanged { run_id, stage });
            }
            Effect::ItemSettled {
                run_id,
                item_id,
                status,
            } => {
                events.push(EngineEvent::ItemSettled {
                    run_id,
                    item_id,
                    status,
                });
            }
        }
    }
    events
}
