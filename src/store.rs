use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, field, info, instrument, warn, Span};

use crate::config::{ConfigError, StoreConfig};
use crate::debounce::{debouncer, DebounceInput, Debouncer};
use crate::error::{RemoteError, StoreError, StoreResult};
use crate::event::{Subscribers, Subscription, SubscriptionId, Transition};
use crate::metrics::{MetricsSnapshot, StoreMetrics};
use crate::model::{
    CollectionSnapshot, Entity, OpToken, OperationKind, PendingDeleteTimer, PendingOperation,
    RecordId, RecordState, Submitted,
};
use crate::remote::RemoteCollection;
use crate::view::{self, FilterSortSpec, Page, PageView};

type EntityOf<R> = <R as RemoteCollection>::Entity;
type KeyOf<R> = <EntityOf<R> as Entity>::Key;
type IdOf<R> = RecordId<KeyOf<R>>;

struct ArmedDelete<K> {
    timer: PendingDeleteTimer<K>,
    task: Option<JoinHandle<()>>,
}

impl<K> ArmedDelete<K> {
    fn disarm(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

struct State<T: Entity> {
    snapshot: CollectionSnapshot<T>,
    pending: HashMap<RecordId<T::Key>, PendingOperation<T>>,
    armed: HashMap<RecordId<T::Key>, ArmedDelete<T::Key>>,
    subscribers: Subscribers<T>,
    next_token: u64,
    latest_load: Option<OpToken>,
}

impl<T: Entity> State<T> {
    fn new() -> Self {
        Self {
            snapshot: CollectionSnapshot::new(),
            pending: HashMap::new(),
            armed: HashMap::new(),
            subscribers: Subscribers::new(),
            next_token: 0,
            latest_load: None,
        }
    }

    fn issue(&mut self) -> OpToken {
        self.next_token += 1;
        OpToken(self.next_token)
    }

    fn is_busy(&self, id: &RecordId<T::Key>) -> bool {
        self.pending.contains_key(id) || self.armed.contains_key(id)
    }

    fn owns(&self, id: &RecordId<T::Key>, token: OpToken) -> bool {
        self.pending.get(id).is_some_and(|op| op.token == token)
    }

    fn emit(
        &mut self,
        transition: Transition,
        operation: Option<OperationKind>,
        target: Option<RecordId<T::Key>>,
        error: Option<StoreError>,
    ) {
        self.subscribers
            .emit(transition, operation, target, &self.snapshot, error);
    }
}

struct Inner<R: RemoteCollection> {
    remote: R,
    config: StoreConfig,
    state: Mutex<State<R::Entity>>,
    metrics: StoreMetrics,
}

/// Locally consistent, optimistically updated mirror of one remote
/// collection.
///
/// Cloning yields another handle onto the same store. Every mutation is
/// applied locally first, then reconciled with the remote result or rolled
/// back to the record captured before the change. At most one operation
/// (or armed delete) may target a record at a time; a second one is
/// refused with [`StoreError::Conflict`].
///
/// Armed deletes run on the ambient Tokio runtime and keep the store alive
/// until they fire or are cancelled.
pub struct OptimisticCollectionStore<R: RemoteCollection> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteCollection> Clone for OptimisticCollectionStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteCollection> fmt::Debug for OptimisticCollectionStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("OptimisticCollectionStore")
            .field("records", &state.snapshot.len())
            .field("pending", &state.pending.len())
            .field("armed_deletes", &state.armed.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<R: RemoteCollection> OptimisticCollectionStore<R> {
    pub fn new(remote: R, config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(remote, config))
    }

    #[must_use]
    pub fn with_defaults(remote: R) -> Self {
        Self::build(remote, StoreConfig::default())
    }

    fn build(remote: R, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                config,
                state: Mutex::new(State::new()),
                metrics: StoreMetrics::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<EntityOf<R>>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    // Reads

    #[must_use]
    pub fn snapshot(&self) -> CollectionSnapshot<EntityOf<R>> {
        self.lock().snapshot.clone()
    }

    pub fn get(&self, id: impl Into<IdOf<R>>) -> Option<EntityOf<R>> {
        let id = id.into();
        self.lock().snapshot.get(&id).map(|entry| entry.entity.clone())
    }

    pub fn record_state(&self, id: impl Into<IdOf<R>>) -> Option<RecordState> {
        let id = id.into();
        self.lock().snapshot.get(&id).map(|entry| entry.state)
    }

    /// Whether an in-flight operation or an armed delete targets `id`.
    pub fn is_pending(&self, id: impl Into<IdOf<R>>) -> bool {
        let id = id.into();
        self.lock().is_busy(&id)
    }

    pub fn pending_delete(&self, id: impl Into<IdOf<R>>) -> Option<PendingDeleteTimer<KeyOf<R>>> {
        let id = id.into();
        self.lock().armed.get(&id).map(|armed| armed.timer.clone())
    }

    /// Filtered, sorted records with pending deletes hidden. Pure.
    #[must_use]
    pub fn visible_snapshot(&self, spec: &FilterSortSpec<EntityOf<R>>) -> Vec<EntityOf<R>> {
        view::visible(&self.lock().snapshot, spec)
    }

    #[must_use]
    pub fn visible_page(
        &self,
        spec: &FilterSortSpec<EntityOf<R>>,
        page: Page,
    ) -> PageView<EntityOf<R>> {
        view::paginate(self.visible_snapshot(spec), page)
    }

    /// Search-box debouncer using the configured quiet period.
    #[must_use]
    pub fn search_debouncer(&self) -> (DebounceInput<String>, Debouncer<String>) {
        debouncer(self.inner.config.search_debounce())
    }

    // Subscriptions

    #[must_use]
    pub fn subscribe(&self) -> Subscription<EntityOf<R>> {
        self.lock().subscribers.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.unsubscribe(id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    // Load

    /// Replaces the whole snapshot with the remote listing.
    ///
    /// Only the most recently issued load is applied; earlier ones resolve
    /// to [`StoreError::Superseded`]. A successful load clears all pending
    /// operations and armed deletes.
    #[instrument(skip(self))]
    pub async fn load(&self) -> StoreResult<CollectionSnapshot<EntityOf<R>>> {
        let ticket = {
            let mut state = self.lock();
            let ticket = state.issue();
            state.latest_load = Some(ticket);
            ticket
        };

        let result = self.inner.remote.list().await;
        self.apply_load(ticket, result)
    }

    fn apply_load(
        &self,
        ticket: OpToken,
        result: Result<Vec<EntityOf<R>>, RemoteError>,
    ) -> StoreResult<CollectionSnapshot<EntityOf<R>>> {
        let mut state = self.lock();

        if state.latest_load != Some(ticket) {
            StoreMetrics::bump(&self.inner.metrics.loads_superseded);
            warn!(ticket = ticket.value(), "load superseded by a newer request");
            return Err(StoreError::Superseded);
        }

        match result {
            Ok(entities) => {
                for (_, armed) in state.armed.drain() {
                    armed.disarm();
                }
                let discarded = state.pending.len();
                state.pending.clear();
                state.snapshot = CollectionSnapshot::from_entities(entities);

                StoreMetrics::bump(&self.inner.metrics.loads_applied);
                info!(
                    records = state.snapshot.len(),
                    discarded_pending = discarded,
                    "collection loaded"
                );
                state.emit(Transition::Loaded, None, None, None);
                Ok(state.snapshot.clone())
            }
            Err(error) => {
                let error = StoreError::from_remote("collection", error);
                warn!(error = %error, "load failed, keeping current snapshot");
                state.emit(Transition::LoadFailed, None, None, Some(error.clone()));
                Err(error)
            }
        }
    }

    // Mutations

    /// Inserts a provisional record at the tail, then swaps in the server's
    /// record in place once the remote assigns an id.
    #[instrument(skip_all, fields(id = field::Empty))]
    pub async fn create(&self, draft: <EntityOf<R> as Entity>::Draft) -> StoreResult<EntityOf<R>> {
        let (id, token) = self.begin_create(&draft)?;
        Span::current().record("id", field::display(&id));

        let result = self.inner.remote.create(&draft).await;
        self.settle(&id, token, OperationKind::Create, result)
    }

    fn begin_create(
        &self,
        draft: &<EntityOf<R> as Entity>::Draft,
    ) -> StoreResult<(IdOf<R>, OpToken)> {
        let mut state = self.lock();
        let id = RecordId::provisional();

        // Check capacity
        let max = self.inner.config.max_records;
        if state.snapshot.len() >= max {
            let error = StoreError::validation(format!(
                "collection is full ({max} records); remove some before adding more"
            ));
            return Err(self.reject(&mut state, OperationKind::Create, &id, error));
        }

        let token = state.issue();
        state.snapshot.push(
            <EntityOf<R> as Entity>::from_draft(id.clone(), draft),
            RecordState::Provisional,
        );
        state.pending.insert(
            id.clone(),
            PendingOperation {
                token,
                kind: OperationKind::Create,
                target: id.clone(),
                submitted: Submitted::Draft(draft.clone()),
                previous: None,
            },
        );

        StoreMetrics::bump(&self.inner.metrics.optimistic_applied);
        state.emit(
            Transition::Optimistic,
            Some(OperationKind::Create),
            Some(id.clone()),
            None,
        );
        Ok((id, token))
    }

    #[instrument(skip_all, fields(id = field::Empty))]
    pub async fn update(
        &self,
        id: impl Into<IdOf<R>>,
        patch: <EntityOf<R> as Entity>::Patch,
    ) -> StoreResult<EntityOf<R>> {
        let id = id.into();
        Span::current().record("id", field::display(&id));

        let (token, key) = self.begin_edit(
            &id,
            OperationKind::Update,
            Submitted::Patch(patch.clone()),
            |entity| entity.apply_patch(&patch),
        )?;
        let result = self.inner.remote.update(&key, &patch).await;
        self.settle(&id, token, OperationKind::Update, result)
    }

    /// `update` specialized to the toggle-style status field.
    #[instrument(skip_all, fields(id = field::Empty))]
    pub async fn set_status(
        &self,
        id: impl Into<IdOf<R>>,
        status: <EntityOf<R> as Entity>::Status,
    ) -> StoreResult<EntityOf<R>> {
        let id = id.into();
        Span::current().record("id", field::display(&id));

        let (token, key) = self.begin_edit(
            &id,
            OperationKind::SetStatus,
            Submitted::Status(status.clone()),
            |entity| entity.apply_status(&status),
        )?;
        let result = self.inner.remote.set_status(&key, &status).await;
        self.settle(&id, token, OperationKind::SetStatus, result)
    }

    fn begin_edit(
        &self,
        id: &IdOf<R>,
        kind: OperationKind,
        submitted: Submitted<EntityOf<R>>,
        apply: impl FnOnce(&mut EntityOf<R>),
    ) -> StoreResult<(OpToken, KeyOf<R>)> {
        let mut state = self.lock();
        let key = match Self::mutable_key(&state, id) {
            Ok(key) => key,
            Err(error) => return Err(self.reject(&mut state, kind, id, error)),
        };

        let token = state.issue();
        let Some(entry) = state.snapshot.get_mut(id) else {
            return Err(StoreError::not_found(id));
        };
        let previous = entry.entity.clone();
        apply(&mut entry.entity);
        entry.state = RecordState::Saving;

        state.pending.insert(
            id.clone(),
            PendingOperation {
                token,
                kind,
                target: id.clone(),
                submitted,
                previous: Some(previous),
            },
        );

        StoreMetrics::bump(&self.inner.metrics.optimistic_applied);
        state.emit(Transition::Optimistic, Some(kind), Some(id.clone()), None);
        Ok((token, key))
    }

    /// Arms a pending delete. The record is hidden from visible views but
    /// stays in the snapshot until the grace window elapses.
    #[instrument(skip_all, fields(id = field::Empty))]
    pub fn remove(&self, id: impl Into<IdOf<R>>) -> StoreResult<PendingDeleteTimer<KeyOf<R>>> {
        let id = id.into();
        Span::current().record("id", field::display(&id));

        let mut state = self.lock();
        if let Err(error) = Self::mutable_key(&state, &id) {
            return Err(self.reject(&mut state, OperationKind::Delete, &id, error));
        }

        let token = state.issue();
        let timer = PendingDeleteTimer::arm(id.clone(), token, self.inner.config.grace_window());
        let task = self.schedule_delete(id.clone(), token, timer.deadline);

        state.snapshot.set_state(&id, RecordState::PendingDelete);
        state.armed.insert(
            id.clone(),
            ArmedDelete {
                timer: timer.clone(),
                task,
            },
        );

        StoreMetrics::bump(&self.inner.metrics.deletes_armed);
        debug!(
            grace_ms = self.inner.config.grace_window_ms,
            "pending delete armed"
        );
        state.emit(
            Transition::DeleteArmed,
            Some(OperationKind::Delete),
            Some(id),
            None,
        );
        Ok(timer)
    }

    /// Clears an armed delete. `false` when nothing was armed for `id` or
    /// the grace window already closed.
    #[instrument(skip_all, fields(id = field::Empty))]
    pub fn cancel_remove(&self, id: impl Into<IdOf<R>>) -> bool {
        let id = id.into();
        Span::current().record("id", field::display(&id));

        let mut state = self.lock();
        let Some(armed) = state.armed.remove(&id) else {
            return false;
        };
        armed.disarm();
        state.snapshot.set_state(&id, RecordState::Synced);

        StoreMetrics::bump(&self.inner.metrics.deletes_cancelled);
        info!("pending delete cancelled");
        state.emit(
            Transition::DeleteCancelled,
            Some(OperationKind::Delete),
            Some(id),
            None,
        );
        true
    }

    /// Closes the grace window now instead of waiting for the timer.
    #[instrument(skip_all, fields(id = field::Empty))]
    pub async fn confirm_remove(&self, id: impl Into<IdOf<R>>) -> StoreResult<()> {
        let id = id.into();
        Span::current().record("id", field::display(&id));

        let (token, key) = self.claim_armed(&id)?;
        let result = self.inner.remote.delete(&key).await;
        self.settle_delete(&id, token, result)
    }

    /// Takes the armed delete for `id` and starts it under one lock, so a
    /// timer waking concurrently finds nothing armed.
    fn claim_armed(&self, id: &IdOf<R>) -> StoreResult<(OpToken, KeyOf<R>)> {
        let mut state = self.lock();
        if let Some(armed) = state.armed.remove(id) {
            armed.disarm();
            return Self::start_delete(&mut state, id).ok_or_else(|| StoreError::not_found(id));
        }

        let deleting = state
            .pending
            .get(id)
            .is_some_and(|op| op.kind == OperationKind::Delete);
        let error = if deleting {
            StoreError::conflict(id)
        } else {
            StoreError::not_found(id)
        };
        Err(self.reject(&mut state, OperationKind::Delete, id, error))
    }

    fn schedule_delete(
        &self,
        id: IdOf<R>,
        token: OpToken,
        deadline: Instant,
    ) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(id = %id, "no async runtime, delete fires only on confirm_remove");
            return None;
        };

        let store = self.clone();
        Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Err(error) = store.fire_delete(&id, token).await {
                warn!(id = %id, error = %error, "scheduled delete failed");
            }
        }))
    }

    /// Runs the remote delete for the arming identified by `token`. A no-op
    /// when that arming was already cancelled, confirmed or reloaded away.
    async fn fire_delete(&self, id: &IdOf<R>, token: OpToken) -> StoreResult<()> {
        let Some((op_token, key)) = self.begin_delete(id, token) else {
            return Ok(());
        };
        let result = self.inner.remote.delete(&key).await;
        self.settle_delete(id, op_token, result)
    }

    fn begin_delete(&self, id: &IdOf<R>, token: OpToken) -> Option<(OpToken, KeyOf<R>)> {
        let mut state = self.lock();
        if !state.armed.get(id).is_some_and(|armed| armed.timer.token == token) {
            return None;
        }
        state.armed.remove(id);
        Self::start_delete(&mut state, id)
    }

    /// Moves a disarmed record into `Deleting` with a pending delete op.
    fn start_delete(
        state: &mut State<EntityOf<R>>,
        id: &IdOf<R>,
    ) -> Option<(OpToken, KeyOf<R>)> {
        let key = id.assigned()?.clone();
        let entry = state.snapshot.get_mut(id)?;
        let previous = entry.entity.clone();
        entry.state = RecordState::Deleting;

        let op_token = state.issue();
        state.pending.insert(
            id.clone(),
            PendingOperation {
                token: op_token,
                kind: OperationKind::Delete,
                target: id.clone(),
                submitted: Submitted::Delete,
                previous: Some(previous),
            },
        );
        debug!(id = %id, "grace window closed, deleting on remote");
        Some((op_token, key))
    }

    fn settle_delete(
        &self,
        id: &IdOf<R>,
        token: OpToken,
        result: Result<(), RemoteError>,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        if !state.owns(id, token) {
            return self.discard_stale(id, OperationKind::Delete, result);
        }
        let previous = state.pending.remove(id).and_then(|op| op.previous);

        match result {
            Ok(()) => {
                state.snapshot.remove(id);
                StoreMetrics::bump(&self.inner.metrics.deletes_confirmed);
                info!(id = %id, "record deleted");
                state.emit(
                    Transition::Deleted,
                    Some(OperationKind::Delete),
                    Some(id.clone()),
                    None,
                );
                Ok(())
            }
            Err(error) => Err(self.fail(&mut state, id, OperationKind::Delete, previous, error)),
        }
    }

    // Completion

    fn settle(
        &self,
        id: &IdOf<R>,
        token: OpToken,
        kind: OperationKind,
        result: Result<EntityOf<R>, RemoteError>,
    ) -> StoreResult<EntityOf<R>> {
        let mut state = self.lock();
        if !state.owns(id, token) {
            return self.discard_stale(id, kind, result);
        }
        let previous = state.pending.remove(id).and_then(|op| op.previous);

        match result {
            Ok(entity) => {
                let target = entity.id().clone();
                if &target != id {
                    // An older local entry under the server's id is replaced below
                    if let Some(armed) = state.armed.remove(&target) {
                        armed.disarm();
                    }
                    state.pending.remove(&target);
                }
                state
                    .snapshot
                    .replace(id, entity.clone(), RecordState::Synced);
                StoreMetrics::bump(&self.inner.metrics.reconciled);
                info!(id = %target, operation = %kind, "reconciled with remote");
                state.emit(Transition::Reconciled, Some(kind), Some(target), None);
                Ok(entity)
            }
            Err(error) => Err(self.fail(&mut state, id, kind, previous, error)),
        }
    }

    /// Reverts a failed operation. `NotFound` drops the record instead of
    /// restoring it; anything else puts `previous` back verbatim, or drops
    /// a provisional record that never had one.
    fn fail(
        &self,
        state: &mut State<EntityOf<R>>,
        id: &IdOf<R>,
        kind: OperationKind,
        previous: Option<EntityOf<R>>,
        error: RemoteError,
    ) -> StoreError {
        let error = StoreError::from_remote(id, error);

        if matches!(error, StoreError::NotFound { .. }) {
            state.snapshot.remove(id);
            StoreMetrics::bump(&self.inner.metrics.implicit_removals);
            warn!(id = %id, operation = %kind, "record no longer exists on remote, removed locally");
            state.emit(
                Transition::RemovedImplicitly,
                Some(kind),
                Some(id.clone()),
                Some(error.clone()),
            );
            return error;
        }

        match previous {
            Some(previous) => {
                state.snapshot.replace(id, previous, RecordState::Synced);
            }
            None => {
                state.snapshot.remove(id);
            }
        }
        StoreMetrics::bump(&self.inner.metrics.rolled_back);
        warn!(id = %id, operation = %kind, error = %error, "remote failed, rolled back");
        state.emit(
            Transition::RolledBack,
            Some(kind),
            Some(id.clone()),
            Some(error.clone()),
        );
        error
    }

    /// A load replaced local state while the call was in flight. The remote
    /// outcome is still reported, local state is left alone.
    fn discard_stale<V>(
        &self,
        id: &IdOf<R>,
        kind: OperationKind,
        result: Result<V, RemoteError>,
    ) -> StoreResult<V> {
        StoreMetrics::bump(&self.inner.metrics.stale_completions);
        debug!(id = %id, operation = %kind, "completion arrived after a reload, discarded");
        result.map_err(|error| StoreError::from_remote(id, error))
    }

    fn mutable_key(state: &State<EntityOf<R>>, id: &IdOf<R>) -> StoreResult<KeyOf<R>> {
        if state.is_busy(id) {
            return Err(StoreError::conflict(id));
        }
        if !state.snapshot.contains(id) {
            return Err(StoreError::not_found(id));
        }
        id.assigned()
            .cloned()
            .ok_or_else(|| StoreError::conflict(id))
    }

    fn reject(
        &self,
        state: &mut State<EntityOf<R>>,
        kind: OperationKind,
        id: &IdOf<R>,
        error: StoreError,
    ) -> StoreError {
        if matches!(error, StoreError::Conflict { .. }) {
            StoreMetrics::bump(&self.inner.metrics.conflicts_rejected);
        }
        debug!(id = %id, operation = %kind, code = error.code(), "operation refused");
        state.emit(
            Transition::Rejected,
            Some(kind),
            Some(id.clone()),
            Some(error.clone()),
        );
        error
    }
}
