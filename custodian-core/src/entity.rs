//! The persistable entity contract.

use std::{fmt, hash::Hash};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    capability::Capabilities,
    event::{DomainEvent, EventKind},
};

/// The state an entity declares for itself.
///
/// Business code sets this on the entity; the context translates it into its
/// own tracking state before committing and writes the post-commit state back
/// afterwards. Keep the field out of the stored document (`#[serde(skip)]`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    #[default]
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// A persistable domain record.
///
/// Entities are stored as serde documents keyed by [`Self::KIND`] and the
/// display form of [`Self::Id`]. Optional behaviour (soft delete, tenancy,
/// audit, concurrency stamps, domain events) is opted into by implementing
/// the matching trait from [`crate::capability`] and listing it in
/// [`Entity::capabilities`]. `#[derive(Entity)]` does both.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier for this entity type in storage.
    const KIND: &'static str;

    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Domain events this entity can raise. Use [`NoEvents`] when it raises
    /// none.
    type Event: EventKind + Clone + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;

    fn object_state(&self) -> ObjectState;

    fn set_object_state(&mut self, state: ObjectState);

    /// The capabilities this type declares.
    fn capabilities() -> Capabilities<Self>;
}

/// Event type for entities that never raise domain events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoEvents {}

impl DomainEvent for NoEvents {
    const KIND: &'static str = "none";
}
