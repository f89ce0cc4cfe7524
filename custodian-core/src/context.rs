//! The persistence context: change tracking, filtered queries and the commit
//! pipeline.
//!
//! A [`DataContext`] is one unit of work. Entities enter it by being added,
//! attached or loaded; business code mutates them and sets their declared
//! [`ObjectState`]; [`DataContext::save_changes`] then writes every pending
//! change as one atomic batch.
//!
//! The commit pipeline, in order:
//!
//! 1. Push each entity's declared state into the tracker, rejecting
//!    inconsistent declarations.
//! 2. Stamp clones of pending entities (concurrency tokens, tenant, audit)
//!    and encode them as writes. Tracked entities are not touched yet.
//! 3. Stop here if the cancellation token has fired.
//! 4. Send the batch to storage. From this point cancellation is ignored.
//! 5. On success, swap the stamped clones in, drain domain events, settle
//!    states and detach deleted entities.
//! 6. Publish the drained events concurrently and wait for all of them.
//!
//! Any failure before step 5 leaves tracked entities exactly as they were.
//!
//! Every method takes `&mut self` or `&self`, so a context is only ever used
//! by one caller at a time. Share the underlying storage, not the context.

use std::sync::Arc;

use nonempty::NonEmpty;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::{Clock, SystemClock},
    capability::{CapabilityError, classify},
    concurrency::{ConcurrencyConflict, StampGenerator, UuidStamps},
    entity::{Entity, ObjectState},
    event::{self, DispatchFailure, NoPublisher, Notification, Publisher},
    predicate::{BoundPredicate, EntityRow, Predicate},
    repository::Repository,
    session::SessionContext,
    stamping::StampContext,
    state::{EntryState, InvalidTransition, TransitionReason},
    store::{CommitError, Document, Storage},
    tracking::{StageError, StagePolicy, Tracker},
};

/// Error returned by [`DataContext::save_changes`].
#[derive(Debug, Error)]
pub enum SaveError<StoreError, PublishError>
where
    StoreError: std::error::Error + 'static,
    PublishError: std::error::Error + 'static,
{
    /// Cancellation was requested before the batch reached storage. Nothing
    /// was written.
    #[error("save cancelled before any change was written")]
    Cancelled,
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Another writer changed or removed a row this batch touched. Nothing
    /// was written.
    #[error(transparent)]
    Concurrency(ConcurrencyConflict),
    #[error("failed to encode {kind} `{id}`: {source}")]
    Encode {
        kind: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// The batch was written but some notifications failed to publish.
    #[error("{rows_affected} rows saved, but {failure}")]
    Dispatch {
        rows_affected: u64,
        #[source]
        failure: DispatchFailure<PublishError>,
    },
}

impl<S, P> SaveError<S, P>
where
    S: std::error::Error + 'static,
    P: std::error::Error + 'static,
{
    /// Whether the batch is durable despite the error.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Dispatch { .. })
    }
}

impl<S, P> From<StageError> for SaveError<S, P>
where
    S: std::error::Error + 'static,
    P: std::error::Error + 'static,
{
    fn from(error: StageError) -> Self {
        match error {
            StageError::Transition(error) => Self::InvalidTransition(error),
            StageError::Encode { kind, id, source } => Self::Encode { kind, id, source },
        }
    }
}

/// Error returned by the query methods of [`DataContext`].
#[derive(Debug, Error)]
pub enum QueryError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("failed to decode {kind} `{id}`: {source}")]
    Decode {
        kind: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

fn decode<E: Entity, Err: std::error::Error>(document: Document) -> Result<E, QueryError<Err>> {
    serde_json::from_value(document.data).map_err(|source| QueryError::Decode {
        kind: E::KIND,
        id: document.id,
        source,
    })
}

fn malformed<E: Entity>(id: &E::Id, error: CapabilityError) -> InvalidTransition {
    InvalidTransition::new(E::KIND, id, TransitionReason::MalformedCapability(error))
}

fn not_tracked<E: Entity>(id: &E::Id) -> InvalidTransition {
    InvalidTransition::new(E::KIND, id, TransitionReason::NotTracked)
}

/// A unit of work over a [`Storage`] engine.
///
/// ```ignore
/// let mut ctx = DataContext::new(store).with_publisher(bus);
/// ctx.add(Customer::new(1, "Ada"))?;
/// let rows = ctx.save_changes(&session, &CancellationToken::new()).await?;
/// ```
pub struct DataContext<S, P = NoPublisher> {
    storage: S,
    publisher: P,
    clock: Arc<dyn Clock>,
    stamps: Arc<dyn StampGenerator>,
    tracker: Tracker,
}

impl<S> DataContext<S> {
    /// Create a context with the system clock, random stamps and no
    /// publisher.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            publisher: NoPublisher,
            clock: Arc::new(SystemClock),
            stamps: Arc::new(UuidStamps),
            tracker: Tracker::default(),
        }
    }
}

impl<S, P> DataContext<S, P> {
    #[must_use]
    pub fn with_publisher<Q>(self, publisher: Q) -> DataContext<S, Q> {
        DataContext {
            storage: self.storage,
            publisher,
            clock: self.clock,
            stamps: self.stamps,
            tracker: self.tracker,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn with_stamps(mut self, stamps: impl StampGenerator + 'static) -> Self {
        self.stamps = Arc::new(stamps);
        self
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    #[must_use]
    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Borrow a typed repository over this context.
    pub fn repository<E: Entity>(&mut self) -> Repository<'_, E, S, P> {
        Repository::new(self)
    }

    /// Track a new entity. It is inserted on the next save.
    pub fn add<E: Entity>(&mut self, mut entity: E) -> Result<&mut E, InvalidTransition> {
        entity.set_object_state(ObjectState::Added);
        let set = self
            .tracker
            .ensure::<E>()
            .map_err(|error| malformed::<E>(entity.id(), error))?;
        set.track(entity, false)
    }

    /// Track an entity known to exist in storage, as unchanged.
    pub fn attach<E: Entity>(&mut self, mut entity: E) -> Result<&mut E, InvalidTransition> {
        entity.set_object_state(ObjectState::Unchanged);
        let set = self
            .tracker
            .ensure::<E>()
            .map_err(|error| malformed::<E>(entity.id(), error))?;
        set.track(entity, true)
    }

    /// Replace the tracked copy of an entity and mark it modified, or attach
    /// it as modified if it is not tracked yet.
    ///
    /// An entity that was added but never saved stays added.
    pub fn update<E: Entity>(&mut self, mut entity: E) -> Result<&mut E, InvalidTransition> {
        let set = self
            .tracker
            .ensure::<E>()
            .map_err(|error| malformed::<E>(entity.id(), error))?;
        let Some(position) = set.position(entity.id()) else {
            entity.set_object_state(ObjectState::Modified);
            return set.track(entity, true);
        };

        let entry = set.entry_at_mut(position);
        let (declared, state) = if entry.persisted {
            (ObjectState::Modified, EntryState::Modified)
        } else {
            (ObjectState::Added, EntryState::Added)
        };
        entity.set_object_state(declared);
        entry.entity = entity;
        entry.state = state;
        Ok(&mut entry.entity)
    }

    /// Mark a tracked entity for deletion.
    ///
    /// An entity that was added but never saved is simply forgotten.
    pub fn remove<E: Entity>(&mut self, id: &E::Id) -> Result<(), InvalidTransition> {
        let set = self
            .tracker
            .set_mut::<E>()
            .ok_or_else(|| not_tracked::<E>(id))?;
        let entry = set.entry_mut(id).ok_or_else(|| not_tracked::<E>(id))?;
        if entry.persisted {
            entry.entity.set_object_state(ObjectState::Deleted);
            entry.state = EntryState::Deleted;
        } else {
            set.detach(id);
        }
        Ok(())
    }

    /// Stop tracking an entity and hand it back.
    pub fn detach<E: Entity>(&mut self, id: &E::Id) -> Option<E> {
        self.tracker.set_mut::<E>()?.detach(id)
    }

    #[must_use]
    pub fn get<E: Entity>(&self, id: &E::Id) -> Option<&E> {
        self.tracker
            .set::<E>()?
            .entry(id)
            .map(|entry| &entry.entity)
    }

    pub fn get_mut<E: Entity>(&mut self, id: &E::Id) -> Option<&mut E> {
        self.tracker
            .set_mut::<E>()?
            .entry_mut(id)
            .map(|entry| &mut entry.entity)
    }

    /// Tracking state as of the last push, or [`EntryState::Detached`].
    #[must_use]
    pub fn entry_state<E: Entity>(&self, id: &E::Id) -> EntryState {
        self.tracker
            .set::<E>()
            .and_then(|set| set.entry(id))
            .map_or(EntryState::Detached, |entry| entry.state)
    }

    /// Tracked entities of `E` that pass its global filter under `session`,
    /// excluding those marked for deletion.
    pub fn tracked<E: Entity>(&self, session: &SessionContext) -> Vec<&E> {
        let Some(set) = self.tracker.set::<E>() else {
            return Vec::new();
        };
        let filter = set.descriptor().filter().bind(session);
        set.entries()
            .filter(|entry| entry.state != EntryState::Deleted)
            .map(|entry| &entry.entity)
            .filter(|entity| filter.matches(&EntityRow::new(*entity, set.capabilities())))
            .collect()
    }

    /// Number of tracked entities across all types.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether any tracked entity declares a state other than unchanged.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    /// Forget every tracked entity.
    pub fn clear(&mut self) {
        self.tracker.clear();
    }

    /// Push one entity's declared state into the tracker.
    pub fn sync_object_state<E: Entity>(
        &mut self,
        id: &E::Id,
    ) -> Result<EntryState, InvalidTransition> {
        self.tracker
            .set_mut::<E>()
            .ok_or_else(|| not_tracked::<E>(id))?
            .push_one(id)
    }

    /// Pull one entity's tracking state back onto it.
    pub fn sync_entity_state<E: Entity>(
        &mut self,
        id: &E::Id,
    ) -> Result<ObjectState, InvalidTransition> {
        self.tracker
            .set_mut::<E>()
            .ok_or_else(|| not_tracked::<E>(id))?
            .pull_one(id)
    }
}

impl<S: Storage, P: Publisher> DataContext<S, P> {
    /// Load every `E` visible to `session` and track it.
    #[tracing::instrument(skip(self), fields(kind = E::KIND))]
    pub async fn load<E: Entity>(
        &mut self,
        session: &SessionContext,
    ) -> Result<Vec<&E>, QueryError<S::Error>> {
        self.load_where(session, Predicate::Always).await
    }

    /// Load the `E`s visible to `session` that also match `predicate`.
    #[tracing::instrument(skip(self, predicate), fields(kind = E::KIND))]
    pub async fn load_where<E: Entity>(
        &mut self,
        session: &SessionContext,
        predicate: Predicate,
    ) -> Result<Vec<&E>, QueryError<S::Error>> {
        let descriptor = classify::<E>()?;
        let filter = descriptor.filter().clone().and(predicate).bind(session);
        self.load_tracked(&filter).await
    }

    /// Load every `E` regardless of soft-delete flags and tenant.
    ///
    /// This bypasses the global filter. Use it for administrative work only.
    #[tracing::instrument(skip(self), fields(kind = E::KIND))]
    pub async fn load_unfiltered<E: Entity>(&mut self) -> Result<Vec<&E>, QueryError<S::Error>> {
        classify::<E>()?;
        self.load_tracked(&BoundPredicate::Always).await
    }

    /// Load the `E`s visible to `session` without tracking them.
    #[tracing::instrument(skip(self), fields(kind = E::KIND))]
    pub async fn load_untracked<E: Entity>(
        &self,
        session: &SessionContext,
    ) -> Result<Vec<E>, QueryError<S::Error>> {
        let descriptor = classify::<E>()?;
        let filter = descriptor.filter().bind(session);
        let documents = self
            .storage
            .load(E::KIND, &filter)
            .await
            .map_err(QueryError::Store)?;
        documents.into_iter().map(decode::<E, S::Error>).collect()
    }

    /// Find one `E` by id.
    ///
    /// A tracked instance is returned without a query, provided it passes
    /// the global filter for `session` and is not marked for deletion.
    /// Otherwise the row is loaded through the global filter and tracked.
    #[tracing::instrument(skip(self), fields(kind = E::KIND))]
    pub async fn find<E: Entity>(
        &mut self,
        session: &SessionContext,
        id: &E::Id,
    ) -> Result<Option<&mut E>, QueryError<S::Error>> {
        let descriptor = classify::<E>()?;
        let filter = descriptor.filter().bind(session);
        if let Some(set) = self.tracker.set::<E>()
            && let Some(entry) = set.entry(id)
        {
            let visible = entry.state != EntryState::Deleted
                && filter.matches(&EntityRow::new(&entry.entity, set.capabilities()));
            return Ok(if visible { self.get_mut::<E>(id) } else { None });
        }

        let key = id.to_string();
        let Some(document) = self
            .storage
            .find(E::KIND, &key, &filter)
            .await
            .map_err(QueryError::Store)?
        else {
            return Ok(None);
        };
        let entity = decode::<E, S::Error>(document)?;
        let set = self.tracker.ensure::<E>()?;
        let position = set.resolve(entity);
        Ok(Some(&mut set.entry_at_mut(position).entity))
    }

    async fn load_tracked<E: Entity>(
        &mut self,
        filter: &BoundPredicate,
    ) -> Result<Vec<&E>, QueryError<S::Error>> {
        let documents = self
            .storage
            .load(E::KIND, filter)
            .await
            .map_err(QueryError::Store)?;
        let loaded = documents
            .into_iter()
            .map(decode::<E, S::Error>)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(rows = loaded.len(), "loaded entities");

        let set = self.tracker.ensure::<E>()?;
        let positions: Vec<_> = loaded.into_iter().map(|entity| set.resolve(entity)).collect();
        let set = &*set;
        Ok(positions
            .into_iter()
            .map(|position| set.entity_at(position))
            .collect())
    }

    /// Write every pending change atomically, then publish domain events.
    ///
    /// Returns the number of rows the storage engine reported as affected.
    /// A call with nothing pending returns `Ok(0)` without touching storage.
    ///
    /// Cancellation is honoured up to the moment the batch is sent. Dropping
    /// the returned future after that point leaves the context out of step
    /// with storage; cancel through `cancel` instead.
    ///
    /// # Errors
    ///
    /// See [`SaveError`]. Every variant except [`SaveError::Dispatch`] means
    /// nothing was written and tracked entities are unchanged.
    #[tracing::instrument(skip(self, cancel), fields(tracked = self.tracker.len()))]
    pub async fn save_changes(
        &mut self,
        session: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<u64, SaveError<S::Error, P::Error>> {
        let stamps = Arc::clone(&self.stamps);
        let ctx = StampContext {
            session,
            now: self.clock.now(),
            stamps: stamps.as_ref(),
        };
        let (rows_affected, notifications) = self
            .write_changes(StagePolicy::Stamped(&ctx), cancel)
            .await?;

        match event::dispatch(&self.publisher, notifications).await {
            Ok(delivered) => {
                tracing::debug!(rows_affected, delivered, "changes saved");
                Ok(rows_affected)
            }
            Err(failure) => Err(SaveError::Dispatch {
                rows_affected,
                failure,
            }),
        }
    }

    /// Write every pending change without stamping, concurrency conditions
    /// or event dispatch.
    ///
    /// For data migrations and repair jobs. Queued domain events stay on
    /// their entities.
    #[tracing::instrument(skip(self, cancel), fields(tracked = self.tracker.len()))]
    pub async fn save_changes_bypassed(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<u64, SaveError<S::Error, P::Error>> {
        let (rows_affected, _) = self.write_changes(StagePolicy::Bypassed, cancel).await?;
        tracing::debug!(rows_affected, "changes saved without stamping");
        Ok(rows_affected)
    }

    async fn write_changes(
        &mut self,
        policy: StagePolicy<'_>,
        cancel: &CancellationToken,
    ) -> Result<(u64, Vec<Notification>), SaveError<S::Error, P::Error>> {
        if cancel.is_cancelled() {
            return Err(SaveError::Cancelled);
        }
        for set in self.tracker.sets_mut() {
            set.push_states()?;
        }

        let mut writes = Vec::new();
        let staged = self
            .tracker
            .sets_mut()
            .try_for_each(|set| set.stage(policy, &mut writes));
        if let Err(error) = staged {
            self.tracker.discard();
            return Err(error.into());
        }
        let Some(batch) = NonEmpty::from_vec(writes) else {
            tracing::debug!("no pending changes");
            return Ok((0, Vec::new()));
        };
        if cancel.is_cancelled() {
            self.tracker.discard();
            tracing::debug!("save cancelled before commit");
            return Err(SaveError::Cancelled);
        }

        tracing::debug!(writes = batch.len(), "committing batch");
        let committed = match self.storage.commit(batch).await {
            Ok(committed) => committed,
            Err(error) => {
                self.tracker.discard();
                return Err(match error {
                    CommitError::Conflict(conflict) => {
                        tracing::debug!(%conflict, "commit rejected");
                        SaveError::Concurrency(conflict)
                    }
                    CommitError::Store(error) => SaveError::Store(error),
                });
            }
        };

        let collect_events = matches!(policy, StagePolicy::Stamped(_));
        let notifications = self.tracker.accept(&committed.outcomes, collect_events);
        Ok((committed.rows_affected, notifications))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capability::{ConcurrencyStamped, HasDomainEvents},
        concurrency::Observed,
        store::inmemory,
        test::{
            ManualClock, RecordingPublisher, SequentialStamps,
            fixtures::{Customer, CustomerEvent, Note},
        },
    };

    fn context(store: &inmemory::Store) -> DataContext<inmemory::Store, RecordingPublisher> {
        DataContext::new(store.clone())
            .with_publisher(RecordingPublisher::default())
            .with_clock(ManualClock::default())
            .with_stamps(SequentialStamps::new("s"))
    }

    fn session() -> SessionContext {
        SessionContext::for_user(1).with_tenant(5)
    }

    #[tokio::test]
    async fn nothing_pending_is_zero_rows() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        let rows = ctx
            .save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(ctx.publisher().recorded().is_empty());
    }

    #[tokio::test]
    async fn save_settles_states_and_stamps_tracked_entity() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        ctx.add(Customer::new(1, "Ada")).unwrap();

        let rows = ctx
            .save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rows, 1);
        let saved = ctx.get::<Customer>(&1).unwrap();
        assert_eq!(saved.object_state(), ObjectState::Unchanged);
        assert_eq!(saved.concurrency_stamp(), Some("s-1"));
        assert_eq!(ctx.entry_state::<Customer>(&1), EntryState::Unchanged);
        assert_eq!(store.get("customer", "1").unwrap().stamp.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn cancellation_before_send_writes_nothing() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        ctx.add(Customer::new(1, "Ada")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctx.save_changes(&session(), &cancel).await.unwrap_err();

        assert!(matches!(err, SaveError::Cancelled));
        assert!(store.is_empty("customer"));
        let tracked = ctx.get::<Customer>(&1).unwrap();
        assert_eq!(tracked.concurrency_stamp(), None);
        assert_eq!(tracked.object_state(), ObjectState::Added);
    }

    #[tokio::test]
    async fn conflict_leaves_tracked_entity_untouched() {
        let store = inmemory::Store::new();
        let mut first = context(&store);
        first.add(Customer::new(1, "Ada")).unwrap();
        first
            .save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();

        let mut second = DataContext::new(store.clone());
        second.find::<Customer>(&session(), &1).await.unwrap().unwrap().name = "B".into();
        second.get_mut::<Customer>(&1).unwrap().set_object_state(ObjectState::Modified);
        second
            .save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();

        let ada = first.get_mut::<Customer>(&1).unwrap();
        ada.name = "A".into();
        ada.set_object_state(ObjectState::Modified);
        let err = first
            .save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap_err();

        let conflict = match err {
            SaveError::Concurrency(conflict) => conflict,
            other => panic!("expected a concurrency conflict, got {other}"),
        };
        assert_eq!(conflict.observed, Observed::Stamp(store.get("customer", "1").unwrap().stamp));
        let ada = first.get::<Customer>(&1).unwrap();
        assert_eq!(ada.concurrency_stamp(), Some("s-1"));
        assert_eq!(ada.object_state(), ObjectState::Modified);
    }

    #[tokio::test]
    async fn events_are_drained_and_published_after_commit() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        let customer = ctx.add(Customer::new(1, "Ada")).unwrap();
        customer.raise(CustomerEvent::renamed("Ada"));

        ctx.save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();

        let recorded = ctx.publisher().recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].source_kind(), "customer");
        assert!(ctx.get::<Customer>(&1).unwrap().domain_events().is_empty());
    }

    #[tokio::test]
    async fn bypassed_save_skips_stamping_and_dispatch() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        let customer = ctx.add(Customer::new(1, "Ada")).unwrap();
        customer.raise(CustomerEvent::renamed("Ada"));

        let rows = ctx
            .save_changes_bypassed(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rows, 1);
        let saved = ctx.get::<Customer>(&1).unwrap();
        assert_eq!(saved.concurrency_stamp(), None);
        assert_eq!(saved.domain_events().len(), 1);
        assert!(ctx.publisher().recorded().is_empty());
    }

    #[tokio::test]
    async fn added_then_deleted_is_rejected_before_any_write() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        ctx.add(Note::new("n1", "draft")).unwrap();
        ctx.add(Customer::new(1, "Ada")).unwrap();
        ctx.get_mut::<Note>(&"n1".to_string())
            .unwrap()
            .set_object_state(ObjectState::Deleted);

        let err = ctx
            .save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap_err();

        let transition = match err {
            SaveError::InvalidTransition(transition) => transition,
            other => panic!("expected an invalid transition, got {other}"),
        };
        assert_eq!(transition.reason, TransitionReason::AddedAndDeleted);
        assert!(store.is_empty("customer"));
        assert_eq!(ctx.get::<Customer>(&1).unwrap().concurrency_stamp(), None);
    }

    #[tokio::test]
    async fn deleted_entities_are_detached_after_commit() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        ctx.add(Note::new("n1", "x")).unwrap();
        ctx.save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();

        ctx.remove::<Note>(&"n1".to_string()).unwrap();
        assert_eq!(ctx.entry_state::<Note>(&"n1".to_string()), EntryState::Deleted);
        ctx.save_changes(&session(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ctx.entry_state::<Note>(&"n1".to_string()), EntryState::Detached);
        assert_eq!(ctx.tracked_len(), 0);
        assert!(store.is_empty("note"));
    }

    #[tokio::test]
    async fn sync_round_trips_state() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        ctx.attach(Note::new("n1", "x")).unwrap();
        let id = "n1".to_string();

        ctx.get_mut::<Note>(&id)
            .unwrap()
            .set_object_state(ObjectState::Modified);
        assert_eq!(ctx.entry_state::<Note>(&id), EntryState::Unchanged);
        assert_eq!(ctx.sync_object_state::<Note>(&id).unwrap(), EntryState::Modified);

        ctx.get_mut::<Note>(&id)
            .unwrap()
            .set_object_state(ObjectState::Unchanged);
        assert_eq!(
            ctx.sync_entity_state::<Note>(&id).unwrap(),
            ObjectState::Modified
        );
        assert_eq!(ctx.get::<Note>(&id).unwrap().object_state(), ObjectState::Modified);
    }

    #[test]
    fn remove_of_unsaved_entity_forgets_it() {
        let store = inmemory::Store::new();
        let mut ctx = context(&store);
        ctx.add(Note::new("n1", "x")).unwrap();
        ctx.remove::<Note>(&"n1".to_string()).unwrap();
        assert_eq!(ctx.tracked_len(), 0);
        assert!(!ctx.has_changes());
    }
}
