//! Per-type entity sets and the type-erased tracker that holds them.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use crate::{
    capability::{Capabilities, CapabilityError, EntityDescriptor, classify},
    entity::{Entity, ObjectState},
    event::Notification,
    stamping::{self, StampContext},
    state::{self, EntryState, InvalidTransition, WriteOutcome},
    store::Write,
};

pub(crate) struct Entry<E> {
    pub(crate) entity: E,
    pub(crate) state: EntryState,
    /// Whether the row is known to exist in storage.
    pub(crate) persisted: bool,
}

#[derive(Clone, Copy)]
pub(crate) enum StagePolicy<'a> {
    Stamped(&'a StampContext<'a>),
    Bypassed,
}

#[derive(Debug)]
pub(crate) enum StageError {
    Transition(InvalidTransition),
    Encode {
        kind: &'static str,
        id: String,
        source: serde_json::Error,
    },
}

impl From<InvalidTransition> for StageError {
    fn from(error: InvalidTransition) -> Self {
        Self::Transition(error)
    }
}

/// Tracked entities of one type, in the order they entered the context.
pub(crate) struct EntitySet<E: Entity> {
    descriptor: Arc<EntityDescriptor>,
    capabilities: Capabilities<E>,
    entries: Vec<Entry<E>>,
    index: HashMap<E::Id, usize>,
    /// Stamped clones awaiting the storage result, by entry position.
    staged: Vec<(usize, E)>,
}

impl<E: Entity> EntitySet<E> {
    pub(crate) fn new() -> Result<Self, CapabilityError> {
        Ok(Self {
            descriptor: classify::<E>()?,
            capabilities: E::capabilities(),
            entries: Vec::new(),
            index: HashMap::new(),
            staged: Vec::new(),
        })
    }

    pub(crate) fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub(crate) const fn capabilities(&self) -> &Capabilities<E> {
        &self.capabilities
    }

    pub(crate) fn position(&self, id: &E::Id) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn entry(&self, id: &E::Id) -> Option<&Entry<E>> {
        self.position(id).map(|position| &self.entries[position])
    }

    pub(crate) fn entry_mut(&mut self, id: &E::Id) -> Option<&mut Entry<E>> {
        self.position(id).map(|position| &mut self.entries[position])
    }

    pub(crate) fn entry_at_mut(&mut self, position: usize) -> &mut Entry<E> {
        &mut self.entries[position]
    }

    pub(crate) fn entity_at(&self, position: usize) -> &E {
        &self.entries[position].entity
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Entry<E>> {
        self.entries.iter()
    }

    /// Start tracking `entity`. Its declared state must be consistent with
    /// `persisted`.
    pub(crate) fn track(&mut self, entity: E, persisted: bool) -> Result<&mut E, InvalidTransition> {
        let rejected = |reason| InvalidTransition::new(E::KIND, entity.id(), reason);
        if self.index.contains_key(entity.id()) {
            return Err(rejected(state::TransitionReason::AlreadyTracked));
        }
        let state = state::push(entity.object_state(), persisted).map_err(rejected)?;

        let position = self.entries.len();
        self.index.insert(entity.id().clone(), position);
        self.entries.push(Entry {
            entity,
            state,
            persisted,
        });
        Ok(&mut self.entries[position].entity)
    }

    /// Identity resolution for a freshly loaded row: an already tracked
    /// instance wins over the loaded copy.
    pub(crate) fn resolve(&mut self, mut loaded: E) -> usize {
        if let Some(position) = self.position(loaded.id()) {
            return position;
        }
        loaded.set_object_state(ObjectState::Unchanged);
        let position = self.entries.len();
        self.index.insert(loaded.id().clone(), position);
        self.entries.push(Entry {
            entity: loaded,
            state: EntryState::Unchanged,
            persisted: true,
        });
        position
    }

    pub(crate) fn detach(&mut self, id: &E::Id) -> Option<E> {
        let position = self.index.remove(id)?;
        let entry = self.entries.remove(position);
        self.reindex();
        Some(entry.entity)
    }

    /// Push one entity's declared state into its entry.
    pub(crate) fn push_one(&mut self, id: &E::Id) -> Result<EntryState, InvalidTransition> {
        let entry = self.entry_mut(id).ok_or_else(|| {
            InvalidTransition::new(E::KIND, id, state::TransitionReason::NotTracked)
        })?;
        entry.state = push_entry(entry)?;
        Ok(entry.state)
    }

    /// Pull one entry's state back onto its entity.
    pub(crate) fn pull_one(&mut self, id: &E::Id) -> Result<ObjectState, InvalidTransition> {
        let not_tracked =
            || InvalidTransition::new(E::KIND, id, state::TransitionReason::NotTracked);
        let entry = self.entry_mut(id).ok_or_else(not_tracked)?;
        let declared = state::pull(entry.state).ok_or_else(not_tracked)?;
        entry.entity.set_object_state(declared);
        Ok(declared)
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.entity.id().clone(), position))
            .collect();
    }

    fn drain_events(&mut self, notifications: &mut Vec<Notification>) {
        let Some(access) = self.capabilities.events_access() else {
            return;
        };
        for entry in &mut self.entries {
            if (access.pending)(&entry.entity) == 0 {
                continue;
            }
            let source_id = entry.entity.id().to_string();
            notifications.extend(
                (access.take)(&mut entry.entity)
                    .into_iter()
                    .map(|event| Notification::new(E::KIND, source_id.clone(), event)),
            );
        }
    }
}

fn push_entry<E: Entity>(entry: &Entry<E>) -> Result<EntryState, InvalidTransition> {
    state::push(entry.entity.object_state(), entry.persisted)
        .map_err(|reason| InvalidTransition::new(E::KIND, entry.entity.id(), reason))
}

/// Object-safe view of an [`EntitySet`] used by the commit pipeline.
pub(crate) trait TrackedSet: Send + Sync {
    fn len(&self) -> usize;

    fn has_changes(&self) -> bool;

    fn push_states(&mut self) -> Result<(), InvalidTransition>;

    /// Build one write per pending entry from a stamped clone of it.
    fn stage(&mut self, policy: StagePolicy<'_>, writes: &mut Vec<Write>)
    -> Result<(), StageError>;

    fn staged_len(&self) -> usize;

    /// Swap staged clones in, settle states from `outcomes`, optionally drain
    /// domain events, and detach deleted entries.
    fn accept(&mut self, outcomes: &[WriteOutcome], notifications: Option<&mut Vec<Notification>>);

    /// Drop staged clones; tracked entities are left as they were.
    fn discard(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> TrackedSet for EntitySet<E> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn has_changes(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.entity.object_state() != ObjectState::Unchanged)
    }

    fn push_states(&mut self) -> Result<(), InvalidTransition> {
        for entry in &mut self.entries {
            entry.state = push_entry(entry)?;
        }
        Ok(())
    }

    fn stage(
        &mut self,
        policy: StagePolicy<'_>,
        writes: &mut Vec<Write>,
    ) -> Result<(), StageError> {
        self.staged.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            if !entry.state.is_pending() {
                continue;
            }
            let mut staged = entry.entity.clone();
            let expected = match policy {
                StagePolicy::Stamped(ctx) => {
                    stamping::stamp(&mut staged, entry.state, &self.capabilities, ctx)?
                }
                StagePolicy::Bypassed => None,
            };

            let id = staged.id().to_string();
            let encode = |entity: &E| {
                serde_json::to_value(entity).map_err(|source| StageError::Encode {
                    kind: E::KIND,
                    id: id.clone(),
                    source,
                })
            };
            let write = match entry.state {
                EntryState::Added => Write::Insert {
                    kind: E::KIND,
                    data: encode(&staged)?,
                    stamp: self.capabilities.current_stamp(&staged),
                    id,
                },
                EntryState::Modified => Write::Update {
                    kind: E::KIND,
                    data: encode(&staged)?,
                    stamp: self.capabilities.current_stamp(&staged),
                    expected,
                    id,
                },
                EntryState::Deleted => Write::Delete {
                    kind: E::KIND,
                    id,
                    expected,
                },
                EntryState::Unchanged | EntryState::Detached => continue,
            };
            writes.push(write);
            self.staged.push((position, staged));
        }
        tracing::trace!(kind = E::KIND, staged = self.staged.len(), "staged writes");
        Ok(())
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn accept(&mut self, outcomes: &[WriteOutcome], notifications: Option<&mut Vec<Notification>>) {
        let staged = std::mem::take(&mut self.staged);
        let mut detached = false;
        for (i, (position, entity)) in staged.into_iter().enumerate() {
            let entry = &mut self.entries[position];
            let outcome = outcomes
                .get(i)
                .copied()
                .or_else(|| WriteOutcome::expected_for(entry.state));
            entry.entity = entity;
            entry.persisted = true;
            entry.state = outcome.map_or(EntryState::Unchanged, WriteOutcome::settled_state);
            detached |= entry.state == EntryState::Detached;
        }

        if let Some(notifications) = notifications {
            self.drain_events(notifications);
        }

        for entry in &mut self.entries {
            if let Some(declared) = state::pull(entry.state) {
                entry.entity.set_object_state(declared);
            }
        }
        if detached {
            self.entries
                .retain(|entry| entry.state != EntryState::Detached);
            self.reindex();
        }
    }

    fn discard(&mut self) {
        self.staged.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Every entity set in a context, keyed by entity type.
#[derive(Default)]
pub(crate) struct Tracker {
    sets: Vec<Box<dyn TrackedSet>>,
    by_type: HashMap<TypeId, usize>,
}

impl Tracker {
    pub(crate) fn set<E: Entity>(&self) -> Option<&EntitySet<E>> {
        let &index = self.by_type.get(&TypeId::of::<E>())?;
        self.sets[index].as_any().downcast_ref()
    }

    pub(crate) fn set_mut<E: Entity>(&mut self) -> Option<&mut EntitySet<E>> {
        let &index = self.by_type.get(&TypeId::of::<E>())?;
        self.sets[index].as_any_mut().downcast_mut()
    }

    /// The set for `E`, created on first use. Fails if `E` cannot be
    /// classified.
    pub(crate) fn ensure<E: Entity>(&mut self) -> Result<&mut EntitySet<E>, CapabilityError> {
        if !self.by_type.contains_key(&TypeId::of::<E>()) {
            let set = EntitySet::<E>::new()?;
            self.by_type.insert(TypeId::of::<E>(), self.sets.len());
            self.sets.push(Box::new(set));
        }
        Ok(self
            .set_mut::<E>()
            .expect("entity set registered under its own type id"))
    }

    pub(crate) fn sets_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn TrackedSet>> {
        self.sets.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.sets.iter().map(|set| set.len()).sum()
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.sets.iter().any(|set| set.has_changes())
    }

    pub(crate) fn discard(&mut self) {
        for set in &mut self.sets {
            set.discard();
        }
    }

    /// Reconcile every set with the storage result, in staging order.
    pub(crate) fn accept(
        &mut self,
        outcomes: &[WriteOutcome],
        collect_events: bool,
    ) -> Vec<Notification> {
        let mut notifications = Vec::new();
        let mut remaining = outcomes;
        for set in &mut self.sets {
            let (mine, rest) = remaining.split_at(set.staged_len().min(remaining.len()));
            remaining = rest;
            set.accept(mine, collect_events.then_some(&mut notifications));
        }
        notifications
    }

    pub(crate) fn clear(&mut self) {
        self.sets.clear();
        self.by_type.clear();
    }
}
