use crate::utils::constants::USGS_NO_DATA_SENTINEL;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A fixed-location water-quality monitoring point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Station {
    #[validate(length(min = 1))]
    pub id: String,

    pub name: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

impl Station {
    pub fn new(id: String, name: String, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            name,
            latitude,
            longitude,
        }
    }

    pub fn same_location(&self, other: &Station) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

/// One timestamped measurement (mg/L) taken at a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(station_id: String, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            station_id,
            value,
            timestamp,
        }
    }

    pub fn is_valid_value(value: f64) -> bool {
        value.is_finite() && value != USGS_NO_DATA_SENTINEL && value >= 0.0
    }
}

/// A station together with the mean of its valid readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSummary {
    pub station: Station,
    pub mean_value: f64,
    pub reading_count: usize,
    pub first_reading_at: DateTime<Utc>,
    pub last_reading_at: DateTime<Utc>,
}

impl StationSummary {
    pub fn id(&self) -> &str {
        &self.station.id
    }

    pub fn latitude(&self) -> f64 {
        self.station.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.station.longitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_validation() {
        let station = Station::new(
            "11447650".to_string(),
            "SACRAMENTO R A FREEPORT CA".to_string(),
            38.4560,
            -121.5010,
        );
        assert!(station.validate().is_ok());
    }

    #[test]
    fn test_invalid_coordinates() {
        let station = Station::new("1".to_string(), "Invalid Station".to_string(), 91.0, -121.5);
        assert!(station.validate().is_err());

        let unnamed = Station::new(String::new(), "No id".to_string(), 38.0, -121.5);
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_reading_value_validity() {
        assert!(Reading::is_valid_value(8.4));
        assert!(Reading::is_valid_value(0.0));
        assert!(!Reading::is_valid_value(-999999.0));
        assert!(!Reading::is_valid_value(f64::NAN));
        assert!(!Reading::is_valid_value(f64::INFINITY));
    }
}
