//! Read-through query cache and optimistic mutation executor
//!
//! Entry storage sits behind a single synchronous mutex that is never held
//! across an `.await`. Snapshotting and applying an optimistic update happen
//! under one lock acquisition, so no other cache operation can observe a
//! partially applied mutation. The only suspension points are remote calls.

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, InFlight, SharedFetch, Slot};
use crate::error::{
    FetchError, FetchResult, MutationError, MutationResult, RemoteError, ValidationError,
};
use crate::keys::{CacheKey, KeySelector};
use crate::metrics::CacheMetrics;
use crate::mutation::{MutationKind, MutationRequest, MutationState, RemoteCall};
use crate::notify::{NotificationSink, NotifyLevel};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use resilience::{with_retry, RetryConfig};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Query side of the remote operation interface
#[async_trait]
pub trait QueryFetcher<V>: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<V, RemoteError>;
}

type FlagKey = (&'static str, String);

struct State<V> {
    slots: HashMap<CacheKey, Slot<V>>,
    /// Guard predictions, e.g. ("liked", video id) -> true
    flags: HashMap<FlagKey, bool>,
    pending: HashMap<Uuid, MutationKind>,
    next_generation: u64,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    fetcher: Arc<dyn QueryFetcher<V>>,
    sink: Arc<dyn NotificationSink>,
    config: CacheConfig,
    metrics: CacheMetrics,
    background: Mutex<Vec<JoinHandle<()>>>,
    pollers: Mutex<HashMap<CacheKey, JoinHandle<()>>>,
}

/// Process-wide query cache handle
///
/// Constructed once at startup and cloned into every consumer.
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Return the in-flight fetch for `key`, or start a new one.
    ///
    /// With `supersede` a new generation always starts; the older fetch still
    /// resolves for its awaiters but no longer writes the entry.
    fn start_fetch(
        inner: &Arc<Inner<V>>,
        state: &mut State<V>,
        key: &CacheKey,
        supersede: bool,
    ) -> SharedFetch<V> {
        if !supersede {
            if let Some(in_flight) = state.slots.get(key).and_then(|s| s.in_flight.as_ref()) {
                debug!(key = %key, "Joining in-flight fetch");
                return in_flight.fetch.clone();
            }
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let fetch = run_fetch(
            Arc::downgrade(inner),
            inner.fetcher.clone(),
            inner.config.query_retry.clone(),
            key.clone(),
            generation,
        )
        .boxed()
        .shared();

        state.slots.entry(key.clone()).or_default().in_flight = Some(InFlight {
            generation,
            fetch: fetch.clone(),
        });
        fetch
    }

    fn settle_fetch(&self, key: &CacheKey, generation: u64, result: &Result<V, FetchError>) {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(key) else {
            debug!(key = %key, "Entry removed before fetch settled");
            return;
        };

        if slot.in_flight.as_ref().map(|f| f.generation) != Some(generation) {
            debug!(key = %key, generation, "Discarding superseded fetch result");
            return;
        }
        slot.in_flight = None;

        match result {
            Ok(value) => {
                slot.write(value.clone());
                slot.stale = false;
                slot.fetched = generation;
                self.metrics.record_fetch(key);
                debug!(key = %key, "Fetch settled");
            }
            Err(e) => {
                slot.stale = true;
                self.metrics.record_fetch_error(key);
                warn!(key = %key, error = %e, "Fetch failed, keeping previous value");
            }
        }
    }
}

async fn run_fetch<V>(
    inner: Weak<Inner<V>>,
    fetcher: Arc<dyn QueryFetcher<V>>,
    retry: RetryConfig,
    key: CacheKey,
    generation: u64,
) -> Result<V, FetchError>
where
    V: Clone + Send + Sync + 'static,
{
    let result = with_retry(&retry, || fetcher.fetch(&key))
        .await
        .map_err(|e| {
            let attempts = e.attempts();
            FetchError {
                key: key.clone(),
                attempts,
                source: e.into_last(),
            }
        });

    if let Some(inner) = inner.upgrade() {
        inner.settle_fetch(&key, generation, &result);
    }
    result
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        config: CacheConfig,
        fetcher: Arc<dyn QueryFetcher<V>>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    slots: HashMap::new(),
                    flags: HashMap::new(),
                    pending: HashMap::new(),
                    next_generation: 0,
                }),
                fetcher,
                sink,
                config,
                metrics: CacheMetrics::new(),
                background: Mutex::new(Vec::new()),
                pollers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // ============= Queries =============

    /// Read-through query.
    ///
    /// A fresh entry is returned without suspending. Absent or stale entries
    /// wait for a fetch, shared with any concurrent caller for the same key.
    pub async fn query(&self, key: &CacheKey) -> FetchResult<CacheEntry<V>> {
        let fetch = {
            let mut state = self.inner.state.lock();
            if let Some(slot) = state.slots.get(key) {
                if slot.is_fresh() {
                    self.inner.metrics.record_hit(key);
                    debug!(key = %key, "Cache hit");
                    return Ok(slot.view(key));
                }
            }
            self.inner.metrics.record_miss(key);
            debug!(key = %key, "Cache miss");
            Inner::start_fetch(&self.inner, &mut state, key, false)
        };

        let value = fetch.await?;
        Ok(self.view_or(key, value))
    }

    /// Force a new fetch regardless of freshness
    pub async fn refetch(&self, key: &CacheKey) -> FetchResult<CacheEntry<V>> {
        let fetch = {
            let mut state = self.inner.state.lock();
            Inner::start_fetch(&self.inner, &mut state, key, true)
        };

        let value = fetch.await?;
        Ok(self.view_or(key, value))
    }

    fn view_or(&self, key: &CacheKey, value: V) -> CacheEntry<V> {
        let state = self.inner.state.lock();
        match state.slots.get(key) {
            Some(slot) => {
                let mut entry = slot.view(key);
                // A superseding fetch may still be running for an empty slot
                if entry.value.is_none() {
                    entry.value = Some(value);
                }
                entry
            }
            None => CacheEntry {
                key: key.clone(),
                value: Some(value),
                stale: false,
                fetching: false,
                updated_at: Some(Utc::now()),
            },
        }
    }

    /// Current entry without fetching
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let state = self.inner.state.lock();
        state.slots.get(key).map(|slot| slot.view(key))
    }

    /// Write a value as if it had been fetched
    pub fn set_query_data(&self, key: &CacheKey, value: V) {
        let mut state = self.inner.state.lock();
        let slot = state.slots.entry(key.clone()).or_default();
        slot.write(value);
        slot.stale = false;
    }

    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.inner.state.lock();
        state.slots.remove(key).and_then(|slot| slot.value)
    }

    /// Drop every entry and guard prediction and stop polling (logout)
    pub fn clear(&self) {
        let entries = {
            let mut state = self.inner.state.lock();
            let entries = state.slots.len();
            state.slots.clear();
            state.flags.clear();
            entries
        };
        for (_, task) in self.inner.pollers.lock().drain() {
            task.abort();
        }
        info!(entries, "Query cache cleared");
    }

    // ============= Invalidation =============

    /// Mark matching entries stale and refetch each of them in the background.
    /// Returns the number of entries invalidated.
    pub fn invalidate(&self, selector: &KeySelector) -> usize {
        self.invalidate_all(std::slice::from_ref(selector))
    }

    /// Like [`invalidate`](Self::invalidate) for several selectors; an entry
    /// matched by more than one selector is refetched once.
    pub fn invalidate_all(&self, selectors: &[KeySelector]) -> usize {
        let fetches: Vec<SharedFetch<V>> = {
            let mut state = self.inner.state.lock();
            let keys: BTreeSet<CacheKey> = state
                .slots
                .keys()
                .filter(|key| selectors.iter().any(|s| s.matches(key)))
                .cloned()
                .collect();

            let mut fetches = Vec::with_capacity(keys.len());
            for key in &keys {
                if let Some(slot) = state.slots.get_mut(key) {
                    slot.stale = true;
                }
                self.inner.metrics.record_invalidation(key);
                fetches.push(Inner::start_fetch(&self.inner, &mut state, key, true));
            }
            fetches
        };

        let count = fetches.len();
        if count > 0 {
            debug!(entries = count, "Invalidated entries, refetching");
        }
        for fetch in fetches {
            self.spawn_background(fetch);
        }
        count
    }

    fn spawn_background(&self, fetch: SharedFetch<V>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(async move {
                    let _ = fetch.await;
                });
                let mut background = self.inner.background.lock();
                background.retain(|t| !t.is_finished());
                background.push(task);
            }
            // Left in place; the next query for the key drives it.
            Err(_) => debug!("No runtime available, refetch deferred to next query"),
        }
    }

    /// Wait until no fetch is in flight
    pub async fn wait_for_fetches(&self) {
        loop {
            let fetches: Vec<SharedFetch<V>> = {
                let state = self.inner.state.lock();
                state
                    .slots
                    .values()
                    .filter_map(|slot| slot.in_flight.as_ref().map(|f| f.fetch.clone()))
                    .collect()
            };
            if fetches.is_empty() {
                return;
            }
            join_all(fetches).await;
        }
    }

    // ============= Polling =============

    /// Invalidate `key` every `every`, refetching it while it stays cached.
    ///
    /// Returns false when the key is already polled or no runtime is
    /// available. Polling ends with [`stop_polling`](Self::stop_polling),
    /// [`clear`](Self::clear), [`shutdown`](Self::shutdown) or when the last
    /// cache handle is dropped.
    pub fn poll(&self, key: &CacheKey, every: Duration) -> bool {
        let mut pollers = self.inner.pollers.lock();
        if pollers.get(key).is_some_and(|task| !task.is_finished()) {
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key = %key, "No runtime available, polling disabled");
            return false;
        };

        let weak = Arc::downgrade(&self.inner);
        let polled = key.clone();
        let task = handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                QueryCache { inner }.invalidate(&KeySelector::Exact(polled.clone()));
            }
        });
        pollers.insert(key.clone(), task);
        debug!(key = %key, interval_ms = every.as_millis() as u64, "Polling started");
        true
    }

    pub fn stop_polling(&self, key: &CacheKey) -> bool {
        match self.inner.pollers.lock().remove(key) {
            Some(task) => {
                task.abort();
                debug!(key = %key, "Polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, key: &CacheKey) -> bool {
        self.inner
            .pollers
            .lock()
            .get(key)
            .is_some_and(|task| !task.is_finished())
    }

    /// Abort background refetches and pollers; called at application shutdown
    pub fn shutdown(&self) {
        let mut tasks: Vec<JoinHandle<()>> = self.inner.background.lock().drain(..).collect();
        tasks.extend(self.inner.pollers.lock().drain().map(|(_, task)| task));
        let aborted = tasks.iter().filter(|t| !t.is_finished()).count();
        for task in tasks {
            task.abort();
        }
        info!(aborted, "Query cache shut down");
    }

    // ============= Guards =============

    /// Predicted guard state, e.g. `flag("following", user)`
    pub fn flag(&self, scope: &'static str, target: &str) -> Option<bool> {
        let state = self.inner.state.lock();
        state.flags.get(&(scope, target.to_string())).copied()
    }

    /// Seed a guard prediction from server data
    pub fn set_flag(&self, scope: &'static str, target: &str, value: bool) {
        let mut state = self.inner.state.lock();
        state.flags.insert((scope, target.to_string()), value);
    }

    // ============= Mutations =============

    pub fn pending_mutations(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_pending(&self, kind: MutationKind) -> bool {
        self.inner.state.lock().pending.values().any(|k| *k == kind)
    }

    /// Run a mutation to completion.
    ///
    /// The optimistic phase runs before this returns its future's first
    /// `Pending`; inside a Tokio runtime the remote phase runs on a spawned
    /// task so dropping the returned future does not abort it. Outside one
    /// it settles on the polling executor.
    pub async fn mutate(&self, request: MutationRequest<V>) -> MutationResult<()> {
        let kind = request.kind;
        let pending = self.begin(request)?;
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            // Settled by the caller's executor instead
            Err(_) => return pending.settle().await,
        };
        match handle.spawn(pending.settle()).await {
            Ok(result) => result,
            Err(join_err) => Err(MutationError::Remote {
                kind,
                source: RemoteError::unavailable(format!("mutation task failed: {}", join_err)),
            }),
        }
    }

    /// Optimistic phase: check the guard, predict every touched entry, take
    /// the snapshot and apply. Nothing is applied if any step is rejected.
    /// Fetches in flight for touched entries are detached and their results
    /// discarded.
    pub fn begin(&self, request: MutationRequest<V>) -> MutationResult<PendingMutation<V>> {
        let MutationRequest {
            kind,
            target,
            updates,
            guard,
            invalidates,
            remote,
        } = request;
        let id = Uuid::new_v4();
        let mut state = self.inner.state.lock();

        let flag = match guard {
            Some(guard) => {
                let flag_key = (guard.scope, guard.target.clone());
                let previous = state.flags.get(&flag_key).copied();
                if previous == Some(guard.state) {
                    drop(state);
                    return Err(self.reject(
                        kind,
                        ValidationError::AlreadyApplied {
                            scope: guard.scope,
                            target: guard.target,
                        },
                    ));
                }
                Some((flag_key, guard.state, previous))
            }
            None => None,
        };

        let mut planned: BTreeMap<CacheKey, V> = BTreeMap::new();
        for update in &updates {
            let matching: Vec<CacheKey> = state
                .slots
                .keys()
                .filter(|key| update.selector.matches(key))
                .cloned()
                .collect();

            for key in matching {
                // Later updates build on earlier predictions for the same key
                let current = match planned.get(&key) {
                    Some(value) => Some(value),
                    None => state.slots.get(&key).and_then(|slot| slot.value.as_ref()),
                };
                let Some(current) = current else { continue };

                match update.compute(&key, current) {
                    Ok(Some(next)) => {
                        planned.insert(key, next);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        drop(state);
                        return Err(self.reject(kind, e));
                    }
                }
            }
        }

        let mut entries = Vec::with_capacity(planned.len());
        for (key, next) in planned {
            let slot = state.slots.entry(key.clone()).or_default();
            entries.push(SnapshotEntry {
                key,
                value: slot.value.clone(),
                // A cancelled fetch leaves the server value unknown
                stale: slot.stale || slot.in_flight.is_some(),
                fetched: slot.fetched,
            });
            // Responses started before the prediction must not overwrite it
            slot.in_flight = None;
            slot.stale = false;
            slot.write(next);
        }

        let flag = flag.map(|(flag_key, next, previous)| {
            state.flags.insert(flag_key.clone(), next);
            (flag_key, previous)
        });
        state.pending.insert(id, kind);
        drop(state);

        debug!(
            mutation_id = %id,
            kind = %kind,
            target = %target,
            touched = entries.len(),
            "Optimistic update applied"
        );

        let mut guard = RollbackGuard {
            cache: self.clone(),
            id,
            kind,
            snapshot: Some(Snapshot { entries, flag }),
            state: MutationState::Idle,
        };
        guard.transition(MutationState::OptimisticallyApplied);

        Ok(PendingMutation {
            id,
            kind,
            target,
            invalidates,
            remote,
            guard,
        })
    }

    fn reject(&self, kind: MutationKind, err: ValidationError) -> MutationError {
        let err = MutationError::Rejected(err);
        info!(kind = %kind, error = %err, "Mutation rejected before apply");
        self.inner.metrics.record_mutation(kind, "rejected");
        self.notify_failure(kind, &err);
        err
    }

    fn notify_failure(&self, kind: MutationKind, err: &MutationError) {
        let (level, message) = kind.failure_notice(err);
        self.inner.sink.notify(level, &message);
    }

    fn confirm(&self, id: Uuid, kind: MutationKind, invalidates: Vec<KeySelector>) {
        self.inner.state.lock().pending.remove(&id);
        self.inner.metrics.record_mutation(kind, "confirmed");
        if let Some(message) = kind.success_message() {
            self.inner.sink.notify(NotifyLevel::Success, message);
        }
        self.invalidate_all(&invalidates);
    }

    fn restore(&self, id: Uuid, kind: MutationKind, snapshot: Snapshot<V>) {
        let mut state = self.inner.state.lock();
        state.pending.remove(&id);
        for entry in snapshot.entries {
            let slot = state.slots.entry(entry.key).or_default();
            // A server response newer than the snapshot landed or is on its way
            let overtaken = slot.fetched != entry.fetched || slot.in_flight.is_some();
            slot.value = entry.value;
            slot.stale = slot.stale || entry.stale || overtaken;
            slot.updated_at = Some(Utc::now());
        }
        if let Some((flag_key, previous)) = snapshot.flag {
            match previous {
                Some(value) => {
                    state.flags.insert(flag_key, value);
                }
                None => {
                    state.flags.remove(&flag_key);
                }
            }
        }
        drop(state);

        self.inner.metrics.record_rollback(kind);
        self.inner.metrics.record_mutation(kind, "rolled_back");
    }
}

struct SnapshotEntry<V> {
    key: CacheKey,
    value: Option<V>,
    stale: bool,
    fetched: u64,
}

/// Pre-mutation copy of every touched entry and guard prediction
struct Snapshot<V> {
    entries: Vec<SnapshotEntry<V>>,
    flag: Option<(FlagKey, Option<bool>)>,
}

/// Owns the snapshot; rolls back if dropped before the mutation settles
struct RollbackGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: QueryCache<V>,
    id: Uuid,
    kind: MutationKind,
    snapshot: Option<Snapshot<V>>,
    state: MutationState,
}

impl<V> RollbackGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn transition(&mut self, next: MutationState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal mutation transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(mutation_id = %self.id, from = ?self.state, to = ?next, "Mutation state");
        self.state = next;
    }

    fn confirm(&mut self, invalidates: &[KeySelector]) {
        if let Some(snapshot) = self.snapshot.take() {
            self.transition(MutationState::Confirmed);
            // Entries that were stale before the prediction still need the server value
            let selectors = invalidates
                .iter()
                .cloned()
                .chain(
                    snapshot
                        .entries
                        .into_iter()
                        .filter(|e| e.stale)
                        .map(|e| KeySelector::Exact(e.key)),
                )
                .collect();
            self.cache.confirm(self.id, self.kind, selectors);
        }
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.transition(MutationState::RolledBack);
            self.cache.restore(self.id, self.kind, snapshot);
        }
    }
}

impl<V> Drop for RollbackGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            warn!(mutation_id = %self.id, kind = %self.kind, "Mutation dropped before settling, rolling back");
            self.rollback();
        }
    }
}

/// A mutation whose optimistic update is visible and whose remote call has
/// not run yet
pub struct PendingMutation<V>
where
    V: Clone + Send + Sync + 'static,
{
    id: Uuid,
    kind: MutationKind,
    target: String,
    invalidates: Vec<KeySelector>,
    remote: RemoteCall,
    guard: RollbackGuard<V>,
}

impl<V> PendingMutation<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> MutationState {
        self.guard.state
    }

    /// Keys whose values were replaced by the optimistic update
    pub fn touched_keys(&self) -> Vec<CacheKey> {
        self.guard
            .snapshot
            .as_ref()
            .map(|s| s.entries.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Remote phase: invoke the call once, then confirm or roll back
    pub async fn settle(self) -> MutationResult<()> {
        let PendingMutation {
            id,
            kind,
            target,
            invalidates,
            remote,
            mut guard,
        } = self;

        match remote().await {
            Ok(()) => {
                guard.confirm(&invalidates);
                info!(mutation_id = %id, kind = %kind, target = %target, "Mutation confirmed");
                Ok(())
            }
            Err(source) => {
                guard.rollback();
                let err = MutationError::Remote { kind, source };
                warn!(mutation_id = %id, kind = %kind, target = %target, error = %err, "Mutation rolled back");
                guard.cache.notify_failure(kind, &err);
                Err(err)
            }
        }
    }

    /// Settle on a runtime task
    ///
    /// # Panics
    ///
    /// Outside a Tokio runtime, like [`tokio::spawn`].
    pub fn spawn(self) -> JoinHandle<MutationResult<()>> {
        tokio::spawn(self.settle())
    }
}
