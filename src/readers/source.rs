use crate::error::Result;
use crate::models::RawBatch;
use crate::readers::{GbifReader, UsgsReader};
use std::path::PathBuf;
use tracing::info;

/// Supplier of one batch of raw records, consumed during the fetch stage.
pub trait RawSource: Send {
    fn fetch(&mut self) -> Result<RawBatch>;
}

/// An already-fetched batch; yields its records once
impl RawSource for RawBatch {
    fn fetch(&mut self) -> Result<RawBatch> {
        Ok(std::mem::take(self))
    }
}

/// Reads a GBIF export and a USGS water-quality response from disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    observations: PathBuf,
    water_quality: PathBuf,
}

impl FileSource {
    pub fn new(observations: impl Into<PathBuf>, water_quality: impl Into<PathBuf>) -> Self {
        Self {
            observations: observations.into(),
            water_quality: water_quality.into(),
        }
    }
}

impl RawSource for FileSource {
    fn fetch(&mut self) -> Result<RawBatch> {
        let observations = GbifReader::new().read_path(&self.observations)?;
        let station_readings = UsgsReader::new().read_path(&self.water_quality)?;

        info!(
            observations = observations.len(),
            readings = station_readings.len(),
            "fetched raw records"
        );

        Ok(RawBatch::new(observations, station_readings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_batch_is_taken_once() {
        let mut batch = RawBatch::new(vec![json!({"key": 1})], vec![]);
        assert_eq!(batch.fetch().unwrap().observations.len(), 1);
        let drained = batch.fetch().unwrap();
        assert!(drained.observations.is_empty());
        assert!(drained.station_readings.is_empty());
    }

    #[test]
    fn test_missing_file_fails_fetch() {
        let mut source = FileSource::new("/nonexistent/gbif.json", "/nonexistent/usgs.json");
        assert!(source.fetch().is_err());
    }
}
