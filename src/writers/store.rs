use crate::models::JoinedRecord;
use thiserror::Error;

/// Store failures, classified by what the loader should do about them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lock contention, serialization failure: retry
    #[error("transient store error: {0}")]
    Transient(String),

    /// Connection refused or lost: retry, fatal once retries run out
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Constraint violation other than the natural-key upsert
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// The store refused the record itself
    #[error("record rejected by store: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Relational target for joined records, keyed on `observation_key`.
pub trait JoinedStore {
    /// Create the table and indexes if missing
    fn ensure_schema(&mut self) -> Result<(), StoreError>;

    /// Insert or update one record inside its own transaction
    fn upsert(&mut self, record: &JoinedRecord) -> Result<UpsertOutcome, StoreError>;

    fn count(&mut self) -> Result<u64, StoreError>;

    /// Up to `limit` rows ordered by observation key
    fn sample(&mut self, limit: usize) -> Result<Vec<JoinedRecord>, StoreError>;
}

impl<S: JoinedStore + ?Sized> JoinedStore for Box<S> {
    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        (**self).ensure_schema()
    }

    fn upsert(&mut self, record: &JoinedRecord) -> Result<UpsertOutcome, StoreError> {
        (**self).upsert(record)
    }

    fn count(&mut self) -> Result<u64, StoreError> {
        (**self).count()
    }

    fn sample(&mut self, limit: usize) -> Result<Vec<JoinedRecord>, StoreError> {
        (**self).sample(limit)
    }
}
