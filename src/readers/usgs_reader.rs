use crate::error::{PipelineError, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Reads already-fetched USGS instantaneous-values JSON documents and
/// flattens them into one raw record per reading.
pub struct UsgsReader;

impl UsgsReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read_path(&self, path: &Path) -> Result<Vec<Value>> {
        let text = fs::read_to_string(path)?;
        let readings = self.parse_json(&text)?;
        debug!(path = %path.display(), readings = readings.len(), "read USGS readings");
        Ok(readings)
    }

    /// Accepts a single IV document or an array of them (one per state query)
    pub fn parse_json(&self, text: &str) -> Result<Vec<Value>> {
        let document: Value = serde_json::from_str(text)?;
        let mut readings = Vec::new();

        match document {
            Value::Array(documents) => {
                for document in &documents {
                    Self::flatten_document(document, &mut readings)?;
                }
            }
            document => Self::flatten_document(&document, &mut readings)?,
        }

        Ok(readings)
    }

    fn flatten_document(document: &Value, readings: &mut Vec<Value>) -> Result<()> {
        let series = document
            .pointer("/value/timeSeries")
            .and_then(Value::as_array)
            .ok_or_else(|| PipelineError::InputShape {
                dataset: "usgs".to_string(),
                field: "value.timeSeries".to_string(),
            })?;

        for time_series in series {
            let source = time_series.get("sourceInfo").unwrap_or(&Value::Null);
            let site_code = source
                .pointer("/siteCode/0/value")
                .cloned()
                .unwrap_or(Value::Null);
            let site_name = source.get("siteName").cloned().unwrap_or(Value::Null);
            let latitude = source
                .pointer("/geoLocation/geogLocation/latitude")
                .cloned()
                .unwrap_or(Value::Null);
            let longitude = source
                .pointer("/geoLocation/geogLocation/longitude")
                .cloned()
                .unwrap_or(Value::Null);
            let unit = time_series
                .pointer("/variable/unit/unitCode")
                .cloned()
                .unwrap_or(Value::Null);

            // Only the primary method block; extra sensor blocks are ignored
            let Some(values) = time_series
                .pointer("/values/0/value")
                .and_then(Value::as_array)
            else {
                debug!(site = %site_code, "time series carries no values");
                continue;
            };

            for reading in values {
                readings.push(json!({
                    "site_code": site_code,
                    "site_name": site_name,
                    "latitude": latitude,
                    "longitude": longitude,
                    "datetime": reading.get("dateTime").cloned().unwrap_or(Value::Null),
                    "value": reading.get("value").cloned().unwrap_or(Value::Null),
                    "unit": unit,
                }));
            }
        }

        Ok(())
    }
}

impl Default for UsgsReader {
    fn default() -> Self {
        Self::new()
    }
}
