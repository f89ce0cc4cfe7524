//! Storage abstractions.
//!
//! This module describes the contract a storage engine fulfils for the
//! persistence context ([`Storage`]), the document and write shapes that cross
//! that boundary, and a reference in-memory engine.
//!
//! Entities cross the boundary as JSON [`Document`]s keyed by entity kind and
//! the display form of the entity id. The concurrency token travels beside the
//! document so engines can condition writes on it without knowing which
//! field of the document holds it.
use std::future::Future;

pub use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    concurrency::{ConcurrencyConflict, ExpectedStamp},
    predicate::BoundPredicate,
    state::WriteOutcome,
};

pub mod inmemory;

/// A stored entity row.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub kind: String,
    pub id: String,
    pub data: serde_json::Value,
    pub stamp: Option<String>,
}

/// One write in a commit batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    /// Create a row. Fails if the key already exists.
    Insert {
        kind: &'static str,
        id: String,
        data: serde_json::Value,
        stamp: Option<String>,
    },
    /// Replace an existing row.
    ///
    /// When `expected` is set, the stored token must equal it.
    Update {
        kind: &'static str,
        id: String,
        data: serde_json::Value,
        stamp: Option<String>,
        expected: Option<ExpectedStamp>,
    },
    /// Physically remove an existing row.
    Delete {
        kind: &'static str,
        id: String,
        expected: Option<ExpectedStamp>,
    },
}

impl Write {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert { kind, .. } | Self::Update { kind, .. } | Self::Delete { kind, .. } => {
                *kind
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Insert { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    #[must_use]
    pub const fn expected(&self) -> Option<&ExpectedStamp> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { expected, .. } | Self::Delete { expected, .. } => expected.as_ref(),
        }
    }

    /// The outcome this write produces when it succeeds.
    #[must_use]
    pub const fn outcome(&self) -> WriteOutcome {
        match self {
            Self::Insert { .. } => WriteOutcome::Inserted,
            Self::Update { .. } => WriteOutcome::Updated,
            Self::Delete { .. } => WriteOutcome::Deleted,
        }
    }
}

/// Result of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed {
    pub rows_affected: u64,
    /// One outcome per write, in batch order.
    pub outcomes: Vec<WriteOutcome>,
}

/// Error from a commit.
///
/// A commit is all-or-nothing: on any error no write in the batch is durable.
#[derive(Debug, Error)]
pub enum CommitError<StoreError>
where
    StoreError: std::error::Error,
{
    /// A conditioned write found a different token, or its row is gone.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError: std::error::Error> CommitError<StoreError> {
    /// Create a store error variant.
    pub const fn store(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Convenience alias for commit outcomes returned by storage engines.
pub type CommitOutcome<Err> = Result<Committed, CommitError<Err>>;

/// Abstraction over the persistence engine.
///
/// Engines must apply a batch atomically and honour every write's
/// [`ExpectedStamp`]. Updates and deletes of rows that do not exist report a
/// [`ConcurrencyConflict`] whether or not they are conditioned.
pub trait Storage: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load every row of `kind` matching `filter`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load<'a>(
        &'a self,
        kind: &'a str,
        filter: &'a BoundPredicate,
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;

    /// Load one row by key, if it exists and matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn find<'a>(
        &'a self,
        kind: &'a str,
        id: &'a str,
        filter: &'a BoundPredicate,
    ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + 'a;

    /// Apply a batch of writes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] when a write's condition fails, or
    /// [`CommitError::Store`] if persistence fails.
    fn commit<'a>(
        &'a self,
        writes: NonEmpty<Write>,
    ) -> impl Future<Output = CommitOutcome<Self::Error>> + Send + 'a;
}
