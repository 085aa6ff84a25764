use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Already-fetched records from both upstream sources, still field-named and untyped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBatch {
    pub observations: Vec<Value>,
    pub station_readings: Vec<Value>,
}

impl RawBatch {
    pub fn new(observations: Vec<Value>, station_readings: Vec<Value>) -> Self {
        Self {
            observations,
            station_readings,
        }
    }
}

/// GBIF occurrence fields the pipeline consumes. Numeric fields stay as raw
/// JSON so both numbers and numeric strings survive the mapping.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GbifOccurrence {
    pub key: Option<Value>,
    #[serde(rename = "gbifID")]
    pub gbif_id: Option<Value>,
    pub species: Option<String>,
    pub scientific_name: Option<String>,
    pub decimal_latitude: Option<Value>,
    pub decimal_longitude: Option<Value>,
    pub year: Option<Value>,
    pub month: Option<Value>,
    pub day: Option<Value>,
    pub state_province: Option<String>,
    pub country: Option<String>,
}

/// One flattened USGS instantaneous-values reading.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsgsReadingRow {
    pub site_code: Option<Value>,
    pub site_name: Option<String>,
    pub latitude: Option<Value>,
    pub longitude: Option<Value>,
    pub datetime: Option<String>,
    pub value: Option<Value>,
    pub unit: Option<String>,
}

impl GbifOccurrence {
    /// Schema mapping for one raw GBIF record; non-objects fail
    pub fn from_raw(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

impl UsgsReadingRow {
    /// Schema mapping for one flattened USGS reading; non-objects fail
    pub fn from_raw(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Blank strings count as absent
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

/// Whether `field` exists as a key on a JSON object, null or not
pub fn has_field(value: &Value, field: &str) -> bool {
    value.as_object().is_some_and(|map| map.contains_key(field))
}
