//! Participant identities and the durable enrollment records tying them to
//! experiments.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A visitor identity. Anonymous visitors are keyed by session, authenticated
/// ones by account id. The two are mutually exclusive; an identity transition
/// is handled by `incorporate`, never by mutating an identity in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Anonymous(String),
    Account(String),
}

impl Identity {
    pub fn session(key: impl Into<String>) -> Self {
        Self::Anonymous(key.into())
    }

    pub fn account(id: impl Into<String>) -> Self {
        Self::Account(id.into())
    }

    /// Identifier used in the counter store. The prefix keeps session and
    /// account keyspaces disjoint.
    pub fn counter_id(&self) -> String {
        match self {
            Self::Anonymous(key) => format!("session:{key}"),
            Self::Account(id) => format!("user:{id}"),
        }
    }
}

/// The durable record of a participant's assigned alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub alternative: String,
    pub enrollment_date: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl EnrollmentRecord {
    pub fn new(alternative: impl Into<String>) -> Self {
        Self {
            alternative: alternative.into(),
            enrollment_date: Utc::now(),
            last_seen: None,
        }
    }
}

/// Durable enrollment persistence. At most one record per
/// (identity, experiment).
pub trait EnrollmentStore: Send + Sync {
    fn get(&self, identity: &Identity, experiment: &str) -> Option<EnrollmentRecord>;

    /// Insert or update atomically. Returns the previous record if one
    /// existed, so callers can distinguish fresh enrollment from
    /// re-assignment even when two writers race.
    fn upsert(
        &self,
        identity: &Identity,
        experiment: &str,
        record: EnrollmentRecord,
    ) -> Option<EnrollmentRecord>;

    fn set_last_seen(&self, identity: &Identity, experiment: &str, last_seen: DateTime<Utc>);

    fn all_for(&self, identity: &Identity) -> Vec<(String, EnrollmentRecord)>;

    fn remove(&self, identity: &Identity, experiment: &str) -> Option<EnrollmentRecord>;

    /// Cascade used by experiment deletion.
    fn remove_experiment(&self, experiment: &str);
}

/// In-process enrollment store.
#[derive(Default)]
pub struct MemoryEnrollmentStore {
    records: DashMap<(Identity, String), EnrollmentRecord>,
}

impl MemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnrollmentStore for MemoryEnrollmentStore {
    fn get(&self, identity: &Identity, experiment: &str) -> Option<EnrollmentRecord> {
        self.records
            .get(&(identity.clone(), experiment.to_string()))
            .map(|entry| entry.clone())
    }

    fn upsert(
        &self,
        identity: &Identity,
        experiment: &str,
        record: EnrollmentRecord,
    ) -> Option<EnrollmentRecord> {
        self.records
            .insert((identity.clone(), experiment.to_string()), record)
    }

    fn set_last_seen(&self, identity: &Identity, experiment: &str, last_seen: DateTime<Utc>) {
        if let Some(mut entry) = self
            .records
            .get_mut(&(identity.clone(), experiment.to_string()))
        {
            entry.last_seen = Some(last_seen);
        }
    }

    fn all_for(&self, identity: &Identity) -> Vec<(String, EnrollmentRecord)> {
        self.records
            .iter()
            .filter(|entry| &entry.key().0 == identity)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect()
    }

    fn remove(&self, identity: &Identity, experiment: &str) -> Option<EnrollmentRecord> {
        self.records
            .remove(&(identity.clone(), experiment.to_string()))
            .map(|(_, record)| record)
    }

    fn remove_experiment(&self, experiment: &str) {
        self.records.retain(|(_, name), _| name != experiment);
    }
}
