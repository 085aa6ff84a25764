use crate::error::PipelineError;
use crate::models::JoinedRecord;
use crate::utils::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_BATCH_TIMEOUT_SECS, DEFAULT_LOAD_BATCH_SIZE,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
use crate::utils::progress::ProgressReporter;
use crate::writers::store::{JoinedStore, StoreError, UpsertOutcome};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}

/// A record the store would not accept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadFailure {
    pub observation_key: String,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadResult {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<LoadFailure>,
}

impl LoadResult {
    pub fn loaded(&self) -> usize {
        self.inserted + self.updated
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} failed",
            self.inserted, self.updated, self.failed
        )
    }
}

/// Loading stopped early because the store stayed unreachable
#[derive(Debug)]
pub struct LoadInterrupted {
    pub partial: LoadResult,
    pub error: PipelineError,
}

/// Writes joined records to a store one transaction at a time, in chunks,
/// retrying transient failures with backoff.
pub struct Loader {
    policy: RetryPolicy,
    batch_size: usize,
    batch_timeout: Duration,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
            batch_timeout: Duration::from_secs(DEFAULT_BATCH_TIMEOUT_SECS),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    /// Make sure the target table exists, retrying while the store is unreachable
    pub fn prepare<S: JoinedStore + ?Sized>(&self, target: &mut S) -> Result<(), PipelineError> {
        let mut attempt = 1;
        loop {
            match target.ensure_schema() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(attempt, ?delay, "schema setup failed, retrying: {}", e);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(StoreError::Unavailable(message)) => {
                    return Err(PipelineError::StoreUnavailable {
                        attempts: attempt,
                        message,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Upsert every record. Per-record rejections are counted and loading
    /// continues; a store that stays unreachable stops the load.
    pub fn load<S: JoinedStore + ?Sized>(
        &self,
        records: Vec<JoinedRecord>,
        target: &mut S,
        progress: Option<&ProgressReporter>,
    ) -> Result<LoadResult, LoadInterrupted> {
        let mut result = LoadResult::default();

        if let Some(p) = progress {
            p.start_bar(records.len() as u64, "Loading joined records");
        }

        for (batch_index, chunk) in records.chunks(self.batch_size).enumerate() {
            let deadline = Instant::now() + self.batch_timeout;
            debug!(batch = batch_index, size = chunk.len(), "loading batch");

            for record in chunk {
                match self.write_with_retry(record, target, deadline) {
                    Ok(UpsertOutcome::Inserted) => result.inserted += 1,
                    Ok(UpsertOutcome::Updated) => result.updated += 1,
                    Err((StoreError::Unavailable(message), attempts)) => {
                        error!(
                            key = %record.observation_key,
                            attempts,
                            "store unreachable, stopping load: {}",
                            message
                        );
                        return Err(LoadInterrupted {
                            partial: result,
                            error: PipelineError::StoreUnavailable { attempts, message },
                        });
                    }
                    Err((e, attempts)) => {
                        error!(key = %record.observation_key, attempts, "record not loaded: {}", e);
                        result.failed += 1;
                        result.failures.push(LoadFailure {
                            observation_key: record.observation_key.clone(),
                            reason: e.to_string(),
                            attempts,
                        });
                    }
                }

                if let Some(p) = progress {
                    p.increment(1);
                }
            }
        }

        info!("load finished: {}", result);
        Ok(result)
    }

    /// Past the batch deadline a record still gets its first attempt but no
    /// retry sleeps
    fn write_with_retry<S: JoinedStore + ?Sized>(
        &self,
        record: &JoinedRecord,
        target: &mut S,
        deadline: Instant,
    ) -> Result<UpsertOutcome, (StoreError, u32)> {
        let mut attempt = 1;
        loop {
            match target.upsert(record) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    if Instant::now() + delay > deadline {
                        warn!(key = %record.observation_key, attempt, "batch timeout reached, not retrying");
                        return Err((e, attempt));
                    }
                    warn!(key = %record.observation_key, attempt, ?delay, "retrying after: {}", e);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};

    /// Scripted store: queued failures are returned before the real upsert
    #[derive(Default)]
    struct ScriptedStore {
        rows: HashMap<String, f64>,
        script: HashMap<String, VecDeque<StoreError>>,
        calls: usize,
    }

    impl ScriptedStore {
        fn fail(mut self, key: &str, errors: Vec<StoreError>) -> Self {
            self.script.insert(key.to_string(), errors.into());
            self
        }
    }

    impl JoinedStore for ScriptedStore {
        fn ensure_schema(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn upsert(&mut self, record: &JoinedRecord) -> Result<UpsertOutcome, StoreError> {
            self.calls += 1;
            if let Some(err) = self
                .script
                .get_mut(&record.observation_key)
                .and_then(|q| q.pop_front())
            {
                return Err(err);
            }
            match self.rows.insert(record.observation_key.clone(), record.avg_value_mg_l) {
                Some(_) => Ok(UpsertOutcome::Updated),
                None => Ok(UpsertOutcome::Inserted),
            }
        }

        fn count(&mut self) -> Result<u64, StoreError> {
            Ok(self.rows.len() as u64)
        }

        fn sample(&mut self, _limit: usize) -> Result<Vec<JoinedRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn record(key: &str) -> JoinedRecord {
        JoinedRecord {
            observation_key: key.to_string(),
            gbif_id: None,
            species: "Castor canadensis".to_string(),
            latitude: 1.0,
            longitude: 1.0,
            year: None,
            month: None,
            day: None,
            state_province: None,
            country: None,
            station_id: "S1".to_string(),
            station_name: "S1".to_string(),
            station_latitude: 1.0,
            station_longitude: 1.0,
            distance_km: 0.0,
            avg_value_mg_l: 8.0,
            reading_count: 1,
        }
    }

    fn fast_loader() -> Loader {
        Loader::new().with_retry_policy(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
        ))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let mut store = ScriptedStore::default()
            .fail("id:1", vec![StoreError::Transient("busy".into()), StoreError::Transient("busy".into())]);

        let result = fast_loader()
            .load(vec![record("id:1"), record("id:2")], &mut store, None)
            .unwrap();

        assert_eq!(result.inserted, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(store.calls, 4);
    }

    #[test]
    fn test_rejected_record_fails_without_retry() {
        let mut store =
            ScriptedStore::default().fail("id:1", vec![StoreError::Rejected("bad row".into())]);

        let result = fast_loader()
            .load(vec![record("id:1"), record("id:2")], &mut store, None)
            .unwrap();

        assert_eq!(result.inserted, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].observation_key, "id:1");
        assert_eq!(result.failures[0].attempts, 1);
        assert_eq!(store.calls, 2);
    }

    #[test]
    fn test_exhausted_transient_retries_count_as_failed() {
        let busy = || StoreError::Transient("busy".into());
        let mut store = ScriptedStore::default().fail("id:1", vec![busy(), busy(), busy()]);

        let result = fast_loader()
            .load(vec![record("id:1")], &mut store, None)
            .unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].attempts, 3);
    }

    #[test]
    fn test_unreachable_store_interrupts_with_partial_counts() {
        let down = || StoreError::Unavailable("connection refused".into());
        let mut store = ScriptedStore::default().fail("id:2", vec![down(), down(), down()]);

        let interrupted = fast_loader()
            .load(vec![record("id:1"), record("id:2"), record("id:3")], &mut store, None)
            .unwrap_err();

        assert_eq!(interrupted.partial.inserted, 1);
        assert!(matches!(
            interrupted.error,
            PipelineError::StoreUnavailable { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_batch_deadline_skips_retry_sleeps() {
        let mut store =
            ScriptedStore::default().fail("id:1", vec![StoreError::Transient("busy".into())]);
        let loader = Loader::new()
            .with_retry_policy(RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(10)))
            .with_batch_timeout(Duration::from_millis(1));

        let started = Instant::now();
        let result = loader
            .load(vec![record("id:1"), record("id:2")], &mut store, None)
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.failed, 1);
        assert_eq!(result.inserted, 1);
    }

    #[test]
    fn test_reload_reports_updates() {
        let mut store = ScriptedStore::default();
        let loader = fast_loader().with_batch_size(2);
        let records = vec![record("id:1"), record("id:2"), record("id:3")];

        let first = loader.load(records.clone(), &mut store, None).unwrap();
        let second = loader.load(records, &mut store, None).unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second.updated, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(store.count().unwrap(), 3);
    }
}
