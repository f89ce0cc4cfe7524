//! Optimistic concurrency: stamp generation and conflict reporting.
//!
//! Entities that opt into the concurrency-stamp capability carry an opaque
//! token. Every insert seeds one, every update or delete rotates it, and the
//! write is conditioned on the token the session last observed. A write whose
//! condition fails surfaces as a [`ConcurrencyConflict`].

use thiserror::Error;
use uuid::Uuid;

/// Produces fresh concurrency tokens.
pub trait StampGenerator: Send + Sync {
    fn next_stamp(&self) -> String;
}

/// Random v4 UUIDs rendered as 32 lowercase hex digits without hyphens.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidStamps;

impl StampGenerator for UuidStamps {
    fn next_stamp(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// The token the writer expected to find on the stored row.
///
/// `ExpectedStamp(None)` conditions the write on the stored row having no
/// token at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedStamp(pub Option<String>);

/// What the storage engine found when a conditioned write failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observed {
    /// The row no longer exists.
    Missing,
    /// The row exists with this token.
    Stamp(Option<String>),
}

/// A write was rejected because another writer changed or removed the row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_conflict(self))]
pub struct ConcurrencyConflict {
    pub kind: String,
    pub id: String,
    /// Token the session expected. `None` for unconditioned writes.
    pub expected: Option<ExpectedStamp>,
    pub observed: Observed,
}

impl ConcurrencyConflict {
    #[must_use]
    pub fn row_missing(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            expected: None,
            observed: Observed::Missing,
        }
    }

    #[must_use]
    pub fn stale(
        kind: impl Into<String>,
        id: impl Into<String>,
        expected: ExpectedStamp,
        actual: Option<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            expected: Some(expected),
            observed: Observed::Stamp(actual),
        }
    }
}

/// Build a human-readable message for a [`ConcurrencyConflict`], including an
/// actionable hint for the caller.
fn format_conflict(conflict: &ConcurrencyConflict) -> String {
    let ConcurrencyConflict {
        kind,
        id,
        expected,
        observed,
    } = conflict;
    match (expected, observed) {
        (_, Observed::Missing) => format!(
            "concurrency conflict on {kind} `{id}`: row no longer exists (hint: another writer \
             deleted it; reload and retry)"
        ),
        (Some(ExpectedStamp(expected)), Observed::Stamp(actual)) => format!(
            "concurrency conflict on {kind} `{id}`: expected stamp {expected:?}, found \
             {actual:?} (hint: row was modified by another writer; reload and retry)"
        ),
        (None, Observed::Stamp(actual)) => format!(
            "concurrency conflict on {kind} `{id}`: unexpected stamp {actual:?} (hint: reload \
             and retry)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_stamps_are_32_hex_digits_and_unique() {
        let stamps = UuidStamps;
        let a = stamps.next_stamp();
        let b = stamps.next_stamp();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn stale_conflict_mentions_both_stamps_and_hint() {
        let conflict = ConcurrencyConflict::stale(
            "customer",
            "42",
            ExpectedStamp(Some("t1".into())),
            Some("t2".into()),
        );
        let msg = conflict.to_string();
        assert!(msg.contains("customer `42`"));
        assert!(msg.contains("t1"));
        assert!(msg.contains("t2"));
        assert!(msg.contains("reload and retry"));
    }

    #[test]
    fn missing_row_conflict_mentions_deletion() {
        let msg = ConcurrencyConflict::row_missing("customer", "7").to_string();
        assert!(msg.contains("no longer exists"));
        assert!(msg.contains("deleted"));
    }
}
