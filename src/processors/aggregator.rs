use crate::models::{Reading, Station, StationSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub stations_seen: usize,
    pub stations_summarized: usize,
    pub stations_without_readings: usize,
    pub readings_aggregated: usize,
    pub orphan_readings: usize,
}

/// Collapses per-station readings into one mean value per station.
pub struct ReadingAggregator;

impl ReadingAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Summaries come back ordered by station id. Stations with no valid
    /// readings are left out and counted in the stats.
    pub fn aggregate(
        &self,
        stations: Vec<Station>,
        readings: Vec<Reading>,
    ) -> (Vec<StationSummary>, AggregateStats) {
        let mut stats = AggregateStats::default();

        let mut by_id: BTreeMap<String, Station> = BTreeMap::new();
        for station in stations {
            by_id.entry(station.id.clone()).or_insert(station);
        }
        stats.stations_seen = by_id.len();

        let mut grouped: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
        for reading in readings {
            if !Reading::is_valid_value(reading.value) {
                continue;
            }
            if by_id.contains_key(&reading.station_id) {
                grouped
                    .entry(reading.station_id.clone())
                    .or_default()
                    .push(reading);
            } else {
                stats.orphan_readings += 1;
            }
        }

        if stats.orphan_readings > 0 {
            warn!(
                count = stats.orphan_readings,
                "dropped readings for unknown stations"
            );
        }

        let mut summaries = Vec::with_capacity(grouped.len());
        for (id, station) in by_id {
            match grouped.remove(&id) {
                Some(group) if !group.is_empty() => {
                    stats.readings_aggregated += group.len();
                    summaries.push(summarize(station, &group));
                }
                _ => {
                    debug!(station = %id, "no valid readings; station left out of matching");
                    stats.stations_without_readings += 1;
                }
            }
        }
        stats.stations_summarized = summaries.len();

        (summaries, stats)
    }
}

impl Default for ReadingAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// `group` must be non-empty
fn summarize(station: Station, group: &[Reading]) -> StationSummary {
    // Summing in sorted order keeps the mean independent of arrival order
    let mut values: Vec<f64> = group.iter().map(|r| r.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let mean_value = values.iter().sum::<f64>() / values.len() as f64;

    let first_reading_at = group.iter().map(|r| r.timestamp).min().unwrap_or_default();
    let last_reading_at = group.iter().map(|r| r.timestamp).max().unwrap_or_default();

    StationSummary {
        station,
        mean_value,
        reading_count: group.len(),
        first_reading_at,
        last_reading_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn station(id: &str) -> Station {
        Station::new(id.to_string(), format!("SITE {}", id), 38.0, -121.0)
    }

    fn reading(id: &str, value: f64, hour: u32) -> Reading {
        Reading::new(
            id.to_string(),
            value,
            Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_mean_of_readings() {
        let (summaries, stats) = ReadingAggregator::new().aggregate(
            vec![station("S1")],
            vec![reading("S1", 7.0, 3), reading("S1", 9.0, 1), reading("S1", 11.0, 2)],
        );

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].mean_value, 9.0);
        assert_eq!(summaries[0].reading_count, 3);
        assert_eq!(summaries[0].first_reading_at.to_rfc3339(), "2024-05-01T01:00:00+00:00");
        assert_eq!(summaries[0].last_reading_at.to_rfc3339(), "2024-05-01T03:00:00+00:00");
        assert_eq!(stats.readings_aggregated, 3);
    }

    #[test]
    fn test_mean_ignores_input_order() {
        let values = [0.1, 0.7, 1e-3, 12.25, 3.3333, 8.0, 0.2];
        let forward: Vec<Reading> = values.iter().map(|v| reading("S1", *v, 0)).collect();
        let backward: Vec<Reading> = values.iter().rev().map(|v| reading("S1", *v, 0)).collect();

        let aggregator = ReadingAggregator::new();
        let (a, _) = aggregator.aggregate(vec![station("S1")], forward);
        let (b, _) = aggregator.aggregate(vec![station("S1")], backward);

        assert_eq!(a[0].mean_value.to_bits(), b[0].mean_value.to_bits());
    }

    #[test]
    fn test_station_without_readings_is_omitted() {
        let (summaries, stats) = ReadingAggregator::new().aggregate(
            vec![station("S2"), station("S1")],
            vec![reading("S2", 8.0, 0), reading("S9", 4.0, 0)],
        );

        let ids: Vec<&str> = summaries.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["S2"]);
        assert_eq!(stats.stations_seen, 2);
        assert_eq!(stats.stations_without_readings, 1);
        assert_eq!(stats.orphan_readings, 1);
    }

    #[test]
    fn test_invalid_values_never_reach_the_mean() {
        let (summaries, stats) = ReadingAggregator::new().aggregate(
            vec![station("S1")],
            vec![reading("S1", f64::NAN, 0), reading("S1", -1.0, 0)],
        );
        assert!(summaries.is_empty());
        assert_eq!(stats.stations_without_readings, 1);
    }
}
