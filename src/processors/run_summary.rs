use crate::error::PipelineError;
use crate::processors::aggregator::AggregateStats;
use crate::processors::matcher::MatchStats;
use crate::processors::normalizer::{NormalizeStats, Rejection};
use crate::writers::{LoadFailure, LoadResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Orchestrator states, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Fetching,
    Normalizing,
    Aggregating,
    Matching,
    Assembling,
    Loading,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Fetching => "fetching",
            PipelineStage::Normalizing => "normalizing",
            PipelineStage::Aggregating => "aggregating",
            PipelineStage::Matching => "matching",
            PipelineStage::Assembling => "assembling",
            PipelineStage::Loading => "loading",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputShape,
    StoreUnavailable,
    TimeoutExceeded,
    Internal,
}

impl From<&PipelineError> for FailureKind {
    fn from(error: &PipelineError) -> Self {
        match error {
            PipelineError::InputShape { .. } => FailureKind::InputShape,
            PipelineError::StoreUnavailable { .. } => FailureKind::StoreUnavailable,
            PipelineError::TimeoutExceeded { .. } => FailureKind::TimeoutExceeded,
            _ => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    /// Stage in flight when the run stopped
    pub stage: PipelineStage,
    pub kind: FailureKind,
    pub reason: String,
}

/// Counts and outcome of one run. Every run ends with one of these, whether
/// it finished or failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub state: PipelineStage,
    pub failure: Option<FailureReport>,
    pub elapsed_ms: u64,

    pub observations_seen: usize,
    pub observations_rejected: usize,
    pub observations_filtered: usize,
    pub readings_seen: usize,
    pub readings_rejected: usize,
    pub rejections: BTreeMap<Rejection, usize>,

    pub stations_seen: usize,
    pub stations_summarized: usize,
    pub stations_without_readings: usize,

    pub observations_matched: usize,
    pub observations_unmatched: usize,
    pub mean_distance_km: Option<f64>,
    pub max_distance_km: Option<f64>,

    pub records_joined: usize,
    pub records_inserted: usize,
    pub records_updated: usize,
    pub records_failed: usize,
    pub load_failures: Vec<LoadFailure>,

    /// Audit artifacts written during the run
    pub blob_keys: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: PipelineStage::Idle,
            failure: None,
            elapsed_ms: 0,
            observations_seen: 0,
            observations_rejected: 0,
            observations_filtered: 0,
            readings_seen: 0,
            readings_rejected: 0,
            rejections: BTreeMap::new(),
            stations_seen: 0,
            stations_summarized: 0,
            stations_without_readings: 0,
            observations_matched: 0,
            observations_unmatched: 0,
            mean_distance_km: None,
            max_distance_km: None,
            records_joined: 0,
            records_inserted: 0,
            records_updated: 0,
            records_failed: 0,
            load_failures: Vec::new(),
            blob_keys: Vec::new(),
        }
    }

    pub fn record_fetch(&mut self, observations: usize, readings: usize) {
        self.observations_seen = observations;
        self.readings_seen = readings;
    }

    pub fn record_normalize(&mut self, stats: &NormalizeStats) {
        self.observations_seen = stats.observations_seen;
        self.observations_rejected = stats.observations_rejected;
        self.observations_filtered = stats.observations_filtered;
        self.readings_seen = stats.readings_seen;
        self.readings_rejected = stats.readings_rejected;
        self.rejections = stats.rejections.clone();
    }

    pub fn record_aggregate(&mut self, stats: &AggregateStats) {
        self.stations_seen = stats.stations_seen;
        self.stations_summarized = stats.stations_summarized;
        self.stations_without_readings = stats.stations_without_readings;
    }

    pub fn record_match(&mut self, stats: &MatchStats) {
        self.observations_matched = stats.observations_matched;
        self.observations_unmatched = stats.observations_unmatched;
        self.mean_distance_km = stats.mean_distance_km;
        self.max_distance_km = stats.max_distance_km;
    }

    pub fn record_load(&mut self, result: &LoadResult) {
        self.records_inserted = result.inserted;
        self.records_updated = result.updated;
        self.records_failed = result.failed;
        self.load_failures = result.failures.clone();
    }

    pub fn records_loaded(&self) -> usize {
        self.records_inserted + self.records_updated
    }

    pub fn rejected_count(&self) -> usize {
        self.observations_rejected + self.readings_rejected
    }

    pub fn is_success(&self) -> bool {
        self.state == PipelineStage::Done
    }

    pub fn complete(&mut self) {
        self.state = PipelineStage::Done;
        self.failure = None;
    }

    pub fn fail(&mut self, stage: PipelineStage, error: &PipelineError) {
        self.state = PipelineStage::Failed;
        self.failure = Some(FailureReport {
            stage,
            kind: FailureKind::from(error),
            reason: error.to_string(),
        });
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ({}) ===", self.run_id)?;
        match &self.failure {
            Some(failure) => writeln!(
                f,
                "State: FAILED during {} ({})",
                failure.stage, failure.reason
            )?,
            None => writeln!(f, "State: {}", self.state)?,
        }
        writeln!(f, "Elapsed: {:.1}s", self.elapsed_ms as f64 / 1000.0)?;

        writeln!(f, "\nObservations:")?;
        writeln!(f, "  Seen: {}", self.observations_seen)?;
        writeln!(f, "  Rejected: {}", self.observations_rejected)?;
        if self.observations_filtered > 0 {
            writeln!(f, "  Filtered by region: {}", self.observations_filtered)?;
        }
        writeln!(f, "  Matched: {}", self.observations_matched)?;
        writeln!(f, "  Unmatched: {}", self.observations_unmatched)?;

        writeln!(f, "\nStations:")?;
        writeln!(f, "  Readings seen: {}", self.readings_seen)?;
        writeln!(f, "  Readings rejected: {}", self.readings_rejected)?;
        writeln!(f, "  Stations seen: {}", self.stations_seen)?;
        writeln!(f, "  Stations with readings: {}", self.stations_summarized)?;
        writeln!(
            f,
            "  Stations without valid readings: {}",
            self.stations_without_readings
        )?;

        if !self.rejections.is_empty() {
            writeln!(f, "\nRejections:")?;
            for (reason, count) in &self.rejections {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        if let (Some(mean), Some(max)) = (self.mean_distance_km, self.max_distance_km) {
            writeln!(f, "\nDistance to nearest station: mean {:.3} km, max {:.3} km", mean, max)?;
        }

        writeln!(f, "\nLoad:")?;
        writeln!(f, "  Joined records: {}", self.records_joined)?;
        writeln!(f, "  Inserted: {}", self.records_inserted)?;
        writeln!(f, "  Updated: {}", self.records_updated)?;
        writeln!(f, "  Failed: {}", self.records_failed)?;
        for (i, failure) in self.load_failures.iter().take(10).enumerate() {
            writeln!(
                f,
                "    {}. {} after {} attempt(s): {}",
                i + 1,
                failure.observation_key,
                failure.attempts,
                failure.reason
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_recorded_with_stage() {
        let mut summary = RunSummary::new("20240501T000000Z");
        summary.fail(
            PipelineStage::Normalizing,
            &PipelineError::InputShape {
                dataset: "usgs".to_string(),
                field: "value".to_string(),
            },
        );

        assert!(!summary.is_success());
        let failure = summary.failure.as_ref().unwrap();
        assert_eq!(failure.stage, PipelineStage::Normalizing);
        assert_eq!(failure.kind, FailureKind::InputShape);
        assert!(summary.to_string().contains("FAILED during normalizing"));
    }

    #[test]
    fn test_summary_serializes_state() {
        let mut summary = RunSummary::new("r1");
        summary.complete();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["state"], "done");
        assert_eq!(json["failure"], serde_json::Value::Null);
    }
}
