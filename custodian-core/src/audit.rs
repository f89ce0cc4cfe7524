//! Audit metadata and the clock that stamps it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who created an entity and who last touched it, and when.
///
/// Embedded in entities that opt into the audit capability. Field names are
/// stable so the struct can be flattened into the stored document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub creator_user_id: Option<i64>,
    pub creation_time: Option<DateTime<Utc>>,
    pub last_modifier_user_id: Option<i64>,
    pub last_modification_time: Option<DateTime<Utc>>,
}

impl AuditInfo {
    /// Record creation. Last-modification mirrors creation so freshly inserted
    /// rows sort correctly by "recently changed".
    pub fn stamp_created(&mut self, user_id: Option<i64>, now: DateTime<Utc>) {
        self.creator_user_id = user_id;
        self.creation_time = Some(now);
        self.last_modifier_user_id = user_id;
        self.last_modification_time = Some(now);
    }

    /// Record a modification. Creation fields are left untouched.
    pub fn stamp_modified(&mut self, user_id: Option<i64>, now: DateTime<Utc>) {
        self.last_modifier_user_id = user_id;
        self.last_modification_time = Some(now);
    }
}

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn created_sets_both_pairs() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut audit = AuditInfo::default();
        audit.stamp_created(Some(1), now);

        assert_eq!(audit.creator_user_id, Some(1));
        assert_eq!(audit.creation_time, Some(now));
        assert_eq!(audit.last_modifier_user_id, Some(1));
        assert_eq!(audit.last_modification_time, Some(now));
    }

    #[test]
    fn modified_preserves_creation() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut audit = AuditInfo::default();
        audit.stamp_created(Some(1), created);
        audit.stamp_modified(Some(2), later);

        assert_eq!(audit.creator_user_id, Some(1));
        assert_eq!(audit.creation_time, Some(created));
        assert_eq!(audit.last_modifier_user_id, Some(2));
        assert_eq!(audit.last_modification_time, Some(later));
    }

    #[test]
    fn flattened_field_names_are_stable() {
        let json = serde_json::to_value(AuditInfo::default()).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "creation_time",
                "creator_user_id",
                "last_modification_time",
                "last_modifier_user_id"
            ]
        );
    }
}
