use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::constants::NATURAL_KEY_COORD_PRECISION;

/// Calendar date of a sighting; any component may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl ObservationDate {
    /// Out-of-range month/day components are treated as unknown
    pub fn new(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> Self {
        Self {
            year,
            month: month.filter(|m| (1..=12).contains(m)),
            day: day.filter(|d| (1..=31).contains(d)),
        }
    }

    fn key_part(&self) -> String {
        let year = self.year.map_or("-".to_string(), |y| format!("{:04}", y));
        let month = self.month.map_or("-".to_string(), |m| format!("{:02}", m));
        let day = self.day.map_or("-".to_string(), |d| format!("{:02}", d));
        format!("{}-{}-{}", year, month, day)
    }
}

/// One geolocated sighting of the species under study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Observation {
    pub id: Option<String>,

    pub species: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub date: ObservationDate,

    pub state_province: Option<String>,

    pub country: Option<String>,
}

impl Observation {
    pub fn new(id: Option<String>, species: String, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            species,
            latitude,
            longitude,
            date: ObservationDate::default(),
            state_province: None,
            country: None,
        }
    }

    pub fn with_date(mut self, date: ObservationDate) -> Self {
        self.date = date;
        self
    }

    pub fn with_region(mut self, state_province: Option<String>, country: Option<String>) -> Self {
        self.state_province = state_province;
        self.country = country;
        self
    }

    /// Stable identity used for upserts.
    ///
    /// Source identifier when present, otherwise species + rounded
    /// coordinates + date.
    pub fn natural_key(&self) -> String {
        match self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => format!("id:{}", id),
            None => format!(
                "obs:{}|{}|{}|{}",
                self.species.trim().to_lowercase(),
                format_key_coordinate(self.latitude),
                format_key_coordinate(self.longitude),
                self.date.key_part()
            ),
        }
    }

    pub fn is_in_region(&self, state_province: &str) -> bool {
        self.state_province
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case(state_province.trim()))
            .unwrap_or(false)
    }
}

fn format_key_coordinate(value: f64) -> String {
    let formatted = format!("{:.*}", NATURAL_KEY_COORD_PRECISION, value);
    // "-0.00000" and "0.00000" name the same place
    if formatted.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
        formatted.trim_start_matches('-').to_string()
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_validation() {
        let obs = Observation::new(Some("1".to_string()), "Castor canadensis".to_string(), 38.5, -121.4);
        assert!(obs.validate().is_ok());

        let invalid = Observation::new(None, "Castor canadensis".to_string(), 200.0, -121.4);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_natural_key_prefers_source_id() {
        let obs = Observation::new(Some(" 4011 ".to_string()), "Castor canadensis".to_string(), 1.0, 2.0);
        assert_eq!(obs.natural_key(), "id:4011");
    }

    #[test]
    fn test_composite_natural_key() {
        let obs = Observation::new(None, "Castor canadensis".to_string(), 38.123456789, -121.0)
            .with_date(ObservationDate::new(Some(2021), Some(6), None));
        assert_eq!(
            obs.natural_key(),
            "obs:castor canadensis|38.12346|-121.00000|2021-06--"
        );

        // Sub-precision jitter maps to the same key
        let jittered = Observation::new(None, "Castor Canadensis".to_string(), 38.123457, -121.000001)
            .with_date(ObservationDate::new(Some(2021), Some(6), None));
        assert_eq!(obs.natural_key(), jittered.natural_key());
    }

    #[test]
    fn test_negative_zero_key_coordinate() {
        assert_eq!(format_key_coordinate(-0.000001), "0.00000");
        assert_eq!(format_key_coordinate(-0.5), "-0.50000");
    }

    #[test]
    fn test_out_of_range_date_parts_are_unknown() {
        let date = ObservationDate::new(Some(2020), Some(13), Some(0));
        assert_eq!(date, ObservationDate::new(Some(2020), None, None));
    }

    #[test]
    fn test_region_match() {
        let obs = Observation::new(None, "Castor canadensis".to_string(), 38.5, -121.4)
            .with_region(Some("California".to_string()), Some("United States of America".to_string()));
        assert!(obs.is_in_region("california"));
        assert!(!obs.is_in_region("Oregon"));
    }
}
