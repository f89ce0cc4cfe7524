//! Aggregate-root repository over a [`DataContext`].
//!
//! A thin, typed facade for code that works with one aggregate type at a
//! time: load by id through the global filter, save new or changed
//! aggregates, and append domain events to a tracked aggregate. Persistence
//! still happens on [`DataContext::save_changes`].

use std::marker::PhantomData;

use thiserror::Error;

use crate::{
    capability::HasDomainEvents,
    context::{DataContext, QueryError},
    entity::{Entity, ObjectState},
    event::Publisher,
    predicate::BoundPredicate,
    session::SessionContext,
    state::{InvalidTransition, TransitionReason},
    store::Storage,
};

/// Error returned by [`Repository::save`].
#[derive(Debug, Error)]
pub enum RepositoryError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Typed view of a context for aggregate type `E`.
pub struct Repository<'a, E, S, P> {
    context: &'a mut DataContext<S, P>,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity, S, P> Repository<'a, E, S, P> {
    pub(crate) const fn new(context: &'a mut DataContext<S, P>) -> Self {
        Self {
            context,
            _entity: PhantomData,
        }
    }

    /// Mark a tracked aggregate for deletion.
    pub fn delete(&mut self, id: &E::Id) -> Result<(), InvalidTransition> {
        self.context.remove::<E>(id)
    }

    /// Queue events on a tracked aggregate.
    ///
    /// An unchanged aggregate is marked modified so that, when stamped, its
    /// concurrency token guards the append.
    pub fn append<I>(&mut self, id: &E::Id, events: I) -> Result<(), InvalidTransition>
    where
        E: HasDomainEvents,
        I: IntoIterator<Item = E::Event>,
    {
        let aggregate = self.context.get_mut::<E>(id).ok_or_else(|| {
            InvalidTransition::new(E::KIND, id, TransitionReason::NotTracked)
        })?;
        aggregate.domain_events_mut().extend(events);
        if aggregate.object_state() == ObjectState::Unchanged {
            aggregate.set_object_state(ObjectState::Modified);
        }
        Ok(())
    }
}

impl<E: Entity, S: Storage, P: Publisher> Repository<'_, E, S, P> {
    /// Track `aggregate` for saving.
    ///
    /// An aggregate that is neither tracked nor stored is inserted. Anything
    /// else is marked modified, including a stored row the context has never
    /// seen (for example one read with
    /// [`DataContext::load_untracked`]).
    #[tracing::instrument(skip(self, aggregate), fields(kind = E::KIND, id = %aggregate.id()))]
    pub async fn save(&mut self, aggregate: E) -> Result<&mut E, RepositoryError<S::Error>> {
        if self.context.get::<E>(aggregate.id()).is_some() {
            return Ok(self.context.update(aggregate)?);
        }
        let key = aggregate.id().to_string();
        let stored = self
            .context
            .storage()
            .find(E::KIND, &key, &BoundPredicate::Always)
            .await
            .map_err(RepositoryError::Store)?
            .is_some();
        tracing::trace!(stored, "saving untracked aggregate");
        if stored {
            Ok(self.context.update(aggregate)?)
        } else {
            Ok(self.context.add(aggregate)?)
        }
    }

    /// Load one aggregate through the global filter.
    pub async fn load(
        &mut self,
        session: &SessionContext,
        id: &E::Id,
    ) -> Result<Option<&mut E>, QueryError<S::Error>> {
        self.context.find::<E>(session, id).await
    }

    /// Load every aggregate visible to `session`.
    pub async fn load_all(
        &mut self,
        session: &SessionContext,
    ) -> Result<Vec<&E>, QueryError<S::Error>> {
        self.context.load::<E>(session).await
    }
}
