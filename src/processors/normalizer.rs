use crate::error::{PipelineError, Result};
use crate::models::raw::{has_field, value_as_f64, value_as_i64, value_as_text};
use crate::models::{
    GbifOccurrence, Observation, ObservationDate, Reading, Station, UsgsReadingRow,
};
use crate::utils::constants::READING_UNIT;
use crate::utils::coordinates::parse_coordinate;
use chrono::{DateTime, NaiveDateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};
use validator::Validate;

/// Why a raw row was dropped during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    UnmappableRecord,
    MissingCoordinates,
    InvalidCoordinates,
    MissingStationId,
    InvalidValue,
    InvalidTimestamp,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rejection::UnmappableRecord => "unmappable record",
            Rejection::MissingCoordinates => "missing coordinates",
            Rejection::InvalidCoordinates => "invalid coordinates",
            Rejection::MissingStationId => "missing station id",
            Rejection::InvalidValue => "invalid value",
            Rejection::InvalidTimestamp => "invalid timestamp",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeStats {
    pub observations_seen: usize,
    pub observations_rejected: usize,
    pub observations_filtered: usize,
    pub readings_seen: usize,
    pub readings_rejected: usize,
    pub stations_seen: usize,
    pub rejections: BTreeMap<Rejection, usize>,
}

impl NormalizeStats {
    pub fn rejected_count(&self) -> usize {
        self.observations_rejected + self.readings_rejected
    }

    fn reject_observation(&mut self, reason: Rejection) {
        self.observations_rejected += 1;
        *self.rejections.entry(reason).or_default() += 1;
    }

    fn reject_reading(&mut self, reason: Rejection) {
        self.readings_rejected += 1;
        *self.rejections.entry(reason).or_default() += 1;
    }
}

/// Canonical output of the normalizer
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub observations: Vec<Observation>,
    pub stations: Vec<Station>,
    pub readings: Vec<Reading>,
    pub stats: NormalizeStats,
}

impl NormalizedBatch {
    pub fn rejected_count(&self) -> usize {
        self.stats.rejected_count()
    }
}

enum ObservationOutcome {
    Accepted(Observation),
    Filtered,
    Rejected(Rejection),
}

enum ReadingOutcome {
    Accepted { station: Station, reading: Reading },
    /// Station is locatable but the measurement itself is unusable
    Unusable { station: Station, reason: Rejection },
    Rejected(Rejection),
}

const OBSERVATION_REQUIRED_FIELDS: [&[&str]; 2] = [&["decimalLatitude"], &["decimalLongitude"]];
const READING_REQUIRED_FIELDS: [&[&str]; 4] = [
    &["site_code", "site_name"],
    &["latitude"],
    &["longitude"],
    &["value"],
];

/// Maps both raw sources into canonical observations, stations and readings.
pub struct Normalizer {
    region_filter: Option<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            region_filter: None,
        }
    }

    /// Keep only observations whose state/province matches (case-insensitive)
    pub fn with_region_filter(mut self, region: Option<String>) -> Self {
        self.region_filter = region.filter(|r| !r.trim().is_empty());
        self
    }

    /// Normalize one batch. Bad rows are counted and dropped; only a batch
    /// whose records all lack a required field is an error.
    pub fn normalize(
        &self,
        raw_observations: Vec<Value>,
        raw_station_readings: Vec<Value>,
    ) -> Result<NormalizedBatch> {
        check_shape("gbif", &raw_observations, &OBSERVATION_REQUIRED_FIELDS)?;
        check_shape("usgs", &raw_station_readings, &READING_REQUIRED_FIELDS)?;

        let mut stats = NormalizeStats {
            observations_seen: raw_observations.len(),
            readings_seen: raw_station_readings.len(),
            ..Default::default()
        };

        let observation_outcomes: Vec<ObservationOutcome> = raw_observations
            .into_par_iter()
            .map(|value| self.normalize_observation(value))
            .collect();

        let mut observations = Vec::with_capacity(observation_outcomes.len());
        for outcome in observation_outcomes {
            match outcome {
                ObservationOutcome::Accepted(observation) => observations.push(observation),
                ObservationOutcome::Filtered => stats.observations_filtered += 1,
                ObservationOutcome::Rejected(reason) => stats.reject_observation(reason),
            }
        }

        let reading_outcomes: Vec<ReadingOutcome> = raw_station_readings
            .into_par_iter()
            .map(normalize_reading)
            .collect();

        let mut stations: BTreeMap<String, Station> = BTreeMap::new();
        let mut relocated: HashSet<String> = HashSet::new();
        let mut readings = Vec::with_capacity(reading_outcomes.len());

        for outcome in reading_outcomes {
            match outcome {
                ReadingOutcome::Accepted { station, reading } => {
                    register_station(&mut stations, &mut relocated, station);
                    readings.push(reading);
                }
                ReadingOutcome::Unusable { station, reason } => {
                    register_station(&mut stations, &mut relocated, station);
                    stats.reject_reading(reason);
                }
                ReadingOutcome::Rejected(reason) => stats.reject_reading(reason),
            }
        }

        // Includes stations whose every reading failed value checks
        stats.stations_seen = stations.len();

        debug!(
            observations = observations.len(),
            stations = stations.len(),
            readings = readings.len(),
            rejected = stats.rejected_count(),
            "normalized batch"
        );

        Ok(NormalizedBatch {
            observations,
            stations: stations.into_values().collect(),
            readings,
            stats,
        })
    }

    fn normalize_observation(&self, value: Value) -> ObservationOutcome {
        let Ok(occurrence) = GbifOccurrence::from_raw(value) else {
            return ObservationOutcome::Rejected(Rejection::UnmappableRecord);
        };

        let observation = match map_occurrence(occurrence) {
            Ok(observation) => observation,
            Err(reason) => return ObservationOutcome::Rejected(reason),
        };

        if let Some(region) = &self.region_filter {
            if !observation.is_in_region(region) {
                return ObservationOutcome::Filtered;
            }
        }

        ObservationOutcome::Accepted(observation)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural check: a non-empty batch must carry each required field on at
/// least one record
fn check_shape(dataset: &str, records: &[Value], required: &[&[&str]]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    for alternatives in required {
        let present = records
            .iter()
            .any(|record| alternatives.iter().any(|field| has_field(record, field)));
        if !present {
            return Err(PipelineError::InputShape {
                dataset: dataset.to_string(),
                field: alternatives.join("|"),
            });
        }
    }

    Ok(())
}

fn map_occurrence(occurrence: GbifOccurrence) -> std::result::Result<Observation, Rejection> {
    let latitude = parse_coordinate_value(occurrence.decimal_latitude.as_ref())?;
    let longitude = parse_coordinate_value(occurrence.decimal_longitude.as_ref())?;

    let id = occurrence
        .key
        .as_ref()
        .and_then(value_as_text)
        .or_else(|| occurrence.gbif_id.as_ref().and_then(value_as_text));

    let species = occurrence
        .species
        .filter(|s| !s.trim().is_empty())
        .or(occurrence.scientific_name)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let date = ObservationDate::new(
        occurrence
            .year
            .as_ref()
            .and_then(value_as_i64)
            .and_then(|y| i32::try_from(y).ok()),
        occurrence
            .month
            .as_ref()
            .and_then(value_as_i64)
            .and_then(|m| u32::try_from(m).ok()),
        occurrence
            .day
            .as_ref()
            .and_then(value_as_i64)
            .and_then(|d| u32::try_from(d).ok()),
    );

    let observation = Observation::new(id, species, latitude, longitude)
        .with_date(date)
        .with_region(
            non_blank(occurrence.state_province),
            non_blank(occurrence.country),
        );

    observation
        .validate()
        .map_err(|_| Rejection::InvalidCoordinates)?;

    Ok(observation)
}

fn normalize_reading(value: Value) -> ReadingOutcome {
    let Ok(row) = UsgsReadingRow::from_raw(value) else {
        return ReadingOutcome::Rejected(Rejection::UnmappableRecord);
    };

    let station = match map_station(&row) {
        Ok(station) => station,
        Err(reason) => return ReadingOutcome::Rejected(reason),
    };

    match map_measurement(&station.id, &row) {
        Ok(reading) => ReadingOutcome::Accepted { station, reading },
        Err(reason) => ReadingOutcome::Unusable { station, reason },
    }
}

/// First-seen coordinates win for a station id
fn register_station(
    stations: &mut BTreeMap<String, Station>,
    relocated: &mut HashSet<String>,
    station: Station,
) {
    match stations.get(&station.id) {
        Some(known) => {
            if !known.same_location(&station) && relocated.insert(station.id.clone()) {
                warn!(
                    station = %station.id,
                    "station reported at more than one location; keeping the first"
                );
            }
        }
        None => {
            stations.insert(station.id.clone(), station);
        }
    }
}

fn map_station(row: &UsgsReadingRow) -> std::result::Result<Station, Rejection> {
    let site_name = non_blank(row.site_name.clone());
    let station_id = row
        .site_code
        .as_ref()
        .and_then(value_as_text)
        .or_else(|| site_name.clone())
        .ok_or(Rejection::MissingStationId)?;

    let latitude = parse_coordinate_value(row.latitude.as_ref())?;
    let longitude = parse_coordinate_value(row.longitude.as_ref())?;

    let station = Station::new(
        station_id.clone(),
        site_name.unwrap_or(station_id),
        latitude,
        longitude,
    );
    station
        .validate()
        .map_err(|_| Rejection::InvalidCoordinates)?;

    Ok(station)
}

fn map_measurement(station_id: &str, row: &UsgsReadingRow) -> std::result::Result<Reading, Rejection> {
    // An absent unit is taken to be mg/L
    if let Some(unit) = row.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        if !unit.eq_ignore_ascii_case(READING_UNIT) {
            return Err(Rejection::InvalidValue);
        }
    }

    let value = row
        .value
        .as_ref()
        .and_then(value_as_f64)
        .filter(|v| Reading::is_valid_value(*v))
        .ok_or(Rejection::InvalidValue)?;

    let timestamp = row
        .datetime
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(Rejection::InvalidTimestamp)?;

    Ok(Reading::new(station_id.to_string(), value, timestamp))
}

fn parse_coordinate_value(value: Option<&Value>) -> std::result::Result<f64, Rejection> {
    match value {
        None | Some(Value::Null) => Err(Rejection::MissingCoordinates),
        Some(Value::Number(n)) => n.as_f64().ok_or(Rejection::InvalidCoordinates),
        Some(Value::String(s)) if s.trim().is_empty() => Err(Rejection::MissingCoordinates),
        Some(Value::String(s)) => parse_coordinate(s).map_err(|_| Rejection::InvalidCoordinates),
        Some(_) => Err(Rejection::InvalidCoordinates),
    }
}

/// RFC 3339 (USGS emits offsets, e.g. `2024-05-01T12:00:00.000-07:00`);
/// offset-less timestamps are taken as UTC
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn occurrence(key: u64, lat: Value, lon: Value) -> Value {
        json!({
            "key": key,
            "species": "Castor canadensis",
            "decimalLatitude": lat,
            "decimalLongitude": lon,
            "year": 2021,
            "month": 6,
            "day": 14,
            "stateProvince": "California",
            "country": "United States of America"
        })
    }

    fn reading(site: &str, lat: f64, lon: f64, value: Value, at: &str) -> Value {
        json!({
            "site_code": site,
            "site_name": format!("SITE {}", site),
            "latitude": lat,
            "longitude": lon,
            "datetime": at,
            "value": value,
            "unit": "mg/l"
        })
    }

    #[test]
    fn test_observation_field_mapping() {
        let batch = Normalizer::new()
            .normalize(vec![occurrence(11, json!(38.5), json!("-121.4"))], vec![])
            .unwrap();

        assert_eq!(batch.observations.len(), 1);
        let obs = &batch.observations[0];
        assert_eq!(obs.id.as_deref(), Some("11"));
        assert_eq!(obs.species, "Castor canadensis");
        assert_eq!(obs.longitude, -121.4);
        assert_eq!(obs.date, ObservationDate::new(Some(2021), Some(6), Some(14)));
        assert_eq!(obs.state_province.as_deref(), Some("California"));
    }

    #[test]
    fn test_out_of_range_latitude_rejected_once() {
        let batch = Normalizer::new()
            .normalize(
                vec![
                    occurrence(1, json!(200.0), json!(10.0)),
                    occurrence(2, json!(10.0), json!(10.0)),
                ],
                vec![],
            )
            .unwrap();

        assert_eq!(batch.observations.len(), 1);
        assert_eq!(batch.rejected_count(), 1);
        assert_eq!(batch.stats.observations_rejected, 1);
        assert_eq!(batch.stats.rejections.get(&Rejection::InvalidCoordinates), Some(&1));
    }

    #[test]
    fn test_bad_rows_do_not_abort_batch() {
        let batch = Normalizer::new()
            .normalize(
                vec![
                    Value::Null,
                    json!("not an object"),
                    occurrence(3, Value::Null, json!(10.0)),
                    occurrence(4, json!("north"), json!(10.0)),
                    occurrence(5, json!(10.0), json!(10.0)),
                ],
                vec![],
            )
            .unwrap();

        assert_eq!(batch.observations.len(), 1);
        assert_eq!(batch.stats.observations_seen, 5);
        assert_eq!(batch.stats.observations_rejected, 4);
        assert_eq!(batch.stats.rejections.get(&Rejection::UnmappableRecord), Some(&2));
        assert_eq!(batch.stats.rejections.get(&Rejection::MissingCoordinates), Some(&1));
    }

    #[test]
    fn test_missing_field_across_batch_is_shape_error() {
        let result = Normalizer::new().normalize(
            vec![json!({"key": 1, "species": "Castor canadensis"})],
            vec![],
        );
        assert!(matches!(
            result,
            Err(PipelineError::InputShape { ref dataset, .. }) if dataset == "gbif"
        ));

        let result = Normalizer::new().normalize(
            vec![],
            vec![json!({"site_code": "1", "latitude": 1.0, "longitude": 1.0})],
        );
        assert!(matches!(
            result,
            Err(PipelineError::InputShape { ref field, .. }) if field == "value"
        ));
    }

    #[test]
    fn test_readings_and_stations() {
        let batch = Normalizer::new()
            .normalize(
                vec![],
                vec![
                    reading("B", 38.0, -121.0, json!("8.4"), "2024-05-01T12:00:00.000-07:00"),
                    reading("B", 38.0, -121.0, json!(7.9), "2024-05-01T12:15:00.000-07:00"),
                    reading("A", 39.0, -122.0, json!("-999999"), "2024-05-01T12:00:00.000-07:00"),
                    reading("A", 39.0, -122.0, json!("Eqp"), "2024-05-01T12:15:00.000-07:00"),
                    reading("C", 95.0, -122.0, json!(8.0), "2024-05-01T12:00:00.000-07:00"),
                    reading("B", 38.0, -121.0, json!(8.0), "yesterday"),
                ],
            )
            .unwrap();

        assert_eq!(batch.readings.len(), 2);
        let ids: Vec<&str> = batch.stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(batch.stats.readings_rejected, 4);
        assert_eq!(batch.stats.rejections.get(&Rejection::InvalidValue), Some(&2));
        assert_eq!(batch.stats.rejections.get(&Rejection::InvalidCoordinates), Some(&1));
        assert_eq!(batch.stats.rejections.get(&Rejection::InvalidTimestamp), Some(&1));
        assert_eq!(
            batch.readings[0].timestamp.to_rfc3339(),
            "2024-05-01T19:00:00+00:00"
        );
    }

    #[test]
    fn test_station_with_only_invalid_values_is_still_seen() {
        let batch = Normalizer::new()
            .normalize(
                vec![],
                vec![reading("A", 39.0, -122.0, Value::Null, "2024-05-01T12:00:00Z")],
            )
            .unwrap();
        assert!(batch.readings.is_empty());
        assert_eq!(batch.stats.stations_seen, 1);
        assert_eq!(batch.stations[0].name, "SITE A");
    }

    #[test]
    fn test_foreign_unit_rejected_as_invalid_value() {
        let mut percent = reading("A", 39.0, -122.0, json!(95.0), "2024-05-01T12:00:00Z");
        percent["unit"] = json!("% saturatn");
        let mut unlabelled = reading("A", 39.0, -122.0, json!(7.5), "2024-05-01T12:15:00Z");
        unlabelled["unit"] = Value::Null;
        let mut upper = reading("A", 39.0, -122.0, json!(8.5), "2024-05-01T12:30:00Z");
        upper["unit"] = json!("MG/L");

        let batch = Normalizer::new()
            .normalize(vec![], vec![percent, unlabelled, upper])
            .unwrap();

        let values: Vec<f64> = batch.readings.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![7.5, 8.5]);
        assert_eq!(batch.stats.rejections.get(&Rejection::InvalidValue), Some(&1));
        assert_eq!(batch.stats.stations_seen, 1);
    }

    #[test]
    fn test_region_filter() {
        let mut oregon = occurrence(9, json!(44.0), json!(-123.0));
        oregon["stateProvince"] = json!("Oregon");

        let batch = Normalizer::new()
            .with_region_filter(Some("california".to_string()))
            .normalize(vec![occurrence(8, json!(38.0), json!(-121.0)), oregon], vec![])
            .unwrap();

        assert_eq!(batch.observations.len(), 1);
        assert_eq!(batch.stats.observations_filtered, 1);
        assert_eq!(batch.rejected_count(), 0);
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let ts = parse_timestamp("2024-05-01T12:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(parse_timestamp("").is_none());
    }
}
