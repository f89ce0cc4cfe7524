//! In-memory storage engine for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`Storage`](super::Storage) suitable for unit tests and examples. Clones
//! share the same data, so two contexts built over clones of one store behave
//! like two sessions against one database.
//!
//! # Example
//!
//! ```
//! use custodian_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! let other_session = store.clone();
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;

use crate::{
    concurrency::ConcurrencyConflict,
    predicate::BoundPredicate,
    store::{CommitError, CommitOutcome, Committed, Document, Storage, Write},
};

/// In-memory store keyed by `(kind, id)`.
///
/// A global sequence number records insertion order so loads return rows in
/// the order they were first written.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

struct Row {
    sequence: u64,
    data: serde_json::Value,
    stamp: Option<String>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, HashMap<String, Row>>,
    next_sequence: u64,
}

impl Inner {
    fn row(&self, kind: &str, id: &str) -> Option<&Row> {
        self.tables.get(kind).and_then(|table| table.get(id))
    }

    /// Check a write against current contents without applying it.
    fn check(&self, write: &Write) -> Result<(), CommitError<InMemoryError>> {
        let existing = self.row(write.kind(), write.id());
        match (write, existing) {
            (Write::Insert { kind, id, .. }, Some(_)) => {
                Err(CommitError::store(InMemoryError::DuplicateKey {
                    kind: (*kind).to_string(),
                    id: id.clone(),
                }))
            }
            (Write::Insert { .. }, None) => Ok(()),
            (Write::Update { kind, id, .. } | Write::Delete { kind, id, .. }, None) => {
                Err(ConcurrencyConflict::row_missing(*kind, id.as_str()).into())
            }
            (Write::Update { kind, id, .. } | Write::Delete { kind, id, .. }, Some(row)) => {
                match write.expected() {
                    Some(expected) if expected.0 != row.stamp => {
                        Err(ConcurrencyConflict::stale(
                            *kind,
                            id.as_str(),
                            expected.clone(),
                            row.stamp.clone(),
                        )
                        .into())
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::Insert {
                kind,
                id,
                data,
                stamp,
            } => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.tables.entry(kind.to_string()).or_default().insert(
                    id,
                    Row {
                        sequence,
                        data,
                        stamp,
                    },
                );
            }
            Write::Update {
                kind,
                id,
                data,
                stamp,
                ..
            } => {
                if let Some(row) = self.tables.get_mut(kind).and_then(|t| t.get_mut(&id)) {
                    row.data = data;
                    row.stamp = stamp;
                }
            }
            Write::Delete { kind, id, .. } => {
                if let Some(table) = self.tables.get_mut(kind) {
                    table.remove(&id);
                }
            }
        }
    }
}

fn document(kind: &str, id: &str, row: &Row) -> Document {
    Document {
        kind: kind.to_string(),
        id: id.to_string(),
        data: row.data.clone(),
        stamp: row.stamp.clone(),
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Number of rows of `kind`, including soft-deleted ones.
    #[must_use]
    pub fn len(&self, kind: &str) -> usize {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        inner.tables.get(kind).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, kind: &str) -> bool {
        self.len(kind) == 0
    }

    /// Read a raw row, bypassing every filter.
    #[must_use]
    pub fn get(&self, kind: &str, id: &str) -> Option<Document> {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        inner.row(kind, id).map(|row| document(kind, id, row))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("duplicate key: {kind} `{id}` already exists")]
    DuplicateKey { kind: String, id: String },
}

impl Storage for Store {
    type Error = InMemoryError;

    #[tracing::instrument(skip(self, filter))]
    fn load<'a>(
        &'a self,
        kind: &'a str,
        filter: &'a BoundPredicate,
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a {
        let documents = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            let mut rows: Vec<_> = inner
                .tables
                .get(kind)
                .into_iter()
                .flatten()
                .filter(|(_, row)| filter.matches(&row.data))
                .collect();
            rows.sort_by_key(|(_, row)| row.sequence);
            rows.into_iter()
                .map(|(id, row)| document(kind, id, row))
                .collect::<Vec<_>>()
        };
        tracing::trace!(rows = documents.len(), "loaded rows");
        std::future::ready(Ok(documents))
    }

    #[tracing::instrument(skip(self, filter))]
    fn find<'a>(
        &'a self,
        kind: &'a str,
        id: &'a str,
        filter: &'a BoundPredicate,
    ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + 'a {
        let found = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            inner
                .row(kind, id)
                .filter(|row| filter.matches(&row.data))
                .map(|row| document(kind, id, row))
        };
        std::future::ready(Ok(found))
    }

    #[tracing::instrument(skip(self, writes), fields(write_count = writes.len()))]
    fn commit<'a>(
        &'a self,
        writes: NonEmpty<Write>,
    ) -> impl Future<Output = CommitOutcome<Self::Error>> + Send + 'a {
        let result: CommitOutcome<InMemoryError> = (|| {
            let mut inner = self.inner.write().expect("in-memory store lock poisoned");
            for write in writes.iter() {
                inner.check(write)?;
            }

            let outcomes: Vec<_> = writes.iter().map(Write::outcome).collect();
            for write in writes {
                inner.apply(write);
            }
            drop(inner);

            tracing::debug!(rows_affected = outcomes.len(), "batch committed");
            Ok(Committed {
                rows_affected: outcomes.len() as u64,
                outcomes,
            })
        })();

        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        concurrency::{ExpectedStamp, Observed},
        predicate::Predicate,
        session::SessionContext,
        state::WriteOutcome,
    };

    fn insert(id: &str, data: serde_json::Value, stamp: Option<&str>) -> Write {
        Write::Insert {
            kind: "widget",
            id: id.to_string(),
            data,
            stamp: stamp.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn commit_then_load_in_insertion_order() {
        let store = Store::new();
        let committed = store
            .commit(NonEmpty::from((
                insert("b", json!({"n": 1}), None),
                vec![insert("a", json!({"n": 2}), None)],
            )))
            .await
            .unwrap();
        assert_eq!(committed.rows_affected, 2);
        assert_eq!(
            committed.outcomes,
            [WriteOutcome::Inserted, WriteOutcome::Inserted]
        );

        let rows = store.load("widget", &BoundPredicate::Always).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[tokio::test]
    async fn load_applies_filter() {
        let store = Store::new();
        store
            .commit(NonEmpty::from((
                insert("1", json!({"is_deleted": false}), None),
                vec![insert("2", json!({"is_deleted": true}), None)],
            )))
            .await
            .unwrap();

        let filter = Predicate::ne("is_deleted", true).bind(&SessionContext::system());
        let rows = store.load("widget", &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "1");
        assert!(store.find("widget", "2", &filter).await.unwrap().is_none());
        assert!(store.get("widget", "2").is_some());
    }

    #[tokio::test]
    async fn stale_stamp_rejects_whole_batch() {
        let store = Store::new();
        store
            .commit(NonEmpty::new(insert("1", json!({}), Some("t1"))))
            .await
            .unwrap();

        let err = store
            .commit(NonEmpty::from((
                insert("2", json!({}), None),
                vec![Write::Update {
                    kind: "widget",
                    id: "1".into(),
                    data: json!({"changed": true}),
                    stamp: Some("t3".into()),
                    expected: Some(ExpectedStamp(Some("t2".into()))),
                }],
            )))
            .await
            .unwrap_err();

        match err {
            CommitError::Conflict(conflict) => {
                assert_eq!(conflict.observed, Observed::Stamp(Some("t1".into())));
            }
            CommitError::Store(e) => panic!("unexpected store error: {e}"),
        }
        assert!(store.get("widget", "2").is_none());
        assert_eq!(store.get("widget", "1").unwrap().data, json!({}));
    }

    #[tokio::test]
    async fn delete_of_missing_row_conflicts() {
        let store = Store::new();
        let err = store
            .commit(NonEmpty::new(Write::Delete {
                kind: "widget",
                id: "404".into(),
                expected: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict(ConcurrencyConflict {
                observed: Observed::Missing,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_store_error() {
        let store = Store::new();
        store
            .commit(NonEmpty::new(insert("1", json!({}), None)))
            .await
            .unwrap();
        let err = store
            .commit(NonEmpty::new(insert("1", json!({}), None)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Store(InMemoryError::DuplicateKey { .. })
        ));
    }
}
