//! Entity lifecycle states and the translation between the state an entity
//! declares ([`ObjectState`]) and the state the context tracks
//! ([`EntryState`]).

use thiserror::Error;

use crate::{capability::CapabilityError, entity::ObjectState};

/// What the context will do with a tracked entity on the next commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Not tracked.
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntryState {
    /// Whether the next commit writes this entry.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

/// Physical result the storage engine reported for one write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    Deleted,
}

impl WriteOutcome {
    /// The tracking state an entry settles into after this outcome.
    #[must_use]
    pub const fn settled_state(self) -> EntryState {
        match self {
            Self::Inserted | Self::Updated => EntryState::Unchanged,
            Self::Deleted => EntryState::Detached,
        }
    }

    /// The outcome a successful write for `state` produces.
    #[must_use]
    pub const fn expected_for(state: EntryState) -> Option<Self> {
        match state {
            EntryState::Added => Some(Self::Inserted),
            EntryState::Modified => Some(Self::Updated),
            EntryState::Deleted => Some(Self::Deleted),
            EntryState::Unchanged | EntryState::Detached => None,
        }
    }
}

/// Why a state transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionReason {
    #[error("it was never persisted, so it cannot be deleted")]
    AddedAndDeleted,
    #[error("it is already persisted; reset its state before adding it again")]
    AlreadyPersisted,
    #[error("it was never persisted, so it cannot be modified; mark it added instead")]
    NotPersisted,
    #[error("an entity with the same id is already tracked")]
    AlreadyTracked,
    #[error("it is not tracked by this context")]
    NotTracked,
    #[error("its capability declaration is malformed: {0}")]
    MalformedCapability(CapabilityError),
}

/// A requested state change that the lifecycle rules forbid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state transition for {kind} `{id}`: {reason}")]
pub struct InvalidTransition {
    pub kind: &'static str,
    pub id: String,
    pub reason: TransitionReason,
}

impl InvalidTransition {
    #[must_use]
    pub fn new(kind: &'static str, id: impl ToString, reason: TransitionReason) -> Self {
        Self {
            kind,
            id: id.to_string(),
            reason,
        }
    }
}

/// Translate a declared state into a tracking state before commit.
///
/// `persisted` says whether the row is known to exist in storage.
pub fn push(declared: ObjectState, persisted: bool) -> Result<EntryState, TransitionReason> {
    match (declared, persisted) {
        (ObjectState::Unchanged, _) => Ok(EntryState::Unchanged),
        (ObjectState::Added, false) => Ok(EntryState::Added),
        (ObjectState::Added, true) => Err(TransitionReason::AlreadyPersisted),
        (ObjectState::Modified, true) => Ok(EntryState::Modified),
        (ObjectState::Modified, false) => Err(TransitionReason::NotPersisted),
        (ObjectState::Deleted, true) => Ok(EntryState::Deleted),
        (ObjectState::Deleted, false) => Err(TransitionReason::AddedAndDeleted),
    }
}

/// Translate a tracking state back into a declared state after commit.
///
/// `None` means the entity is no longer tracked.
#[must_use]
pub const fn pull(state: EntryState) -> Option<ObjectState> {
    match state {
        EntryState::Detached => None,
        EntryState::Unchanged => Some(ObjectState::Unchanged),
        EntryState::Added => Some(ObjectState::Added),
        EntryState::Modified => Some(ObjectState::Modified),
        EntryState::Deleted => Some(ObjectState::Deleted),
    }
}
