use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{PipelineError, Result};
use crate::models::{Observation, StationSummary};

/// An observation paired with its nearest station summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JoinedRecord {
    pub observation_key: String,
    pub gbif_id: Option<String>,
    pub species: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub state_province: Option<String>,
    pub country: Option<String>,

    pub station_id: String,
    pub station_name: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub station_latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub station_longitude: f64,

    #[validate(range(min = 0.0))]
    pub distance_km: f64,

    #[validate(range(min = 0.0))]
    pub avg_value_mg_l: f64,

    #[validate(range(min = 1))]
    pub reading_count: u32,
}

impl JoinedRecord {
    pub fn builder() -> JoinedRecordBuilder {
        JoinedRecordBuilder::new()
    }
}

#[derive(Default)]
pub struct JoinedRecordBuilder {
    observation: Option<Observation>,
    summary: Option<StationSummary>,
    distance_km: Option<f64>,
}

impl JoinedRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }

    pub fn station_summary(mut self, summary: StationSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn distance_km(mut self, distance_km: f64) -> Self {
        self.distance_km = Some(distance_km);
        self
    }

    pub fn build(self) -> Result<JoinedRecord> {
        let observation = self
            .observation
            .ok_or_else(|| PipelineError::InvalidFormat("observation is required".to_string()))?;
        let summary = self
            .summary
            .ok_or_else(|| PipelineError::InvalidFormat("station summary is required".to_string()))?;
        let distance_km = self
            .distance_km
            .ok_or_else(|| PipelineError::InvalidFormat("distance_km is required".to_string()))?;

        let record = JoinedRecord {
            observation_key: observation.natural_key(),
            gbif_id: observation.id,
            species: observation.species,
            latitude: observation.latitude,
            longitude: observation.longitude,
            year: observation.date.year,
            month: observation.date.month,
            day: observation.date.day,
            state_province: observation.state_province,
            country: observation.country,
            station_id: summary.station.id,
            station_name: summary.station.name,
            station_latitude: summary.station.latitude,
            station_longitude: summary.station.longitude,
            distance_km,
            avg_value_mg_l: summary.mean_value,
            reading_count: u32::try_from(summary.reading_count).unwrap_or(u32::MAX),
        };

        record.validate()?;
        Ok(record)
    }
}
