use crate::error::Result;
use crate::models::JoinedRecord;
use crate::processors::matcher::NearestPair;

/// Flattens matched pairs into load-ready joined records, one per pair.
pub struct JoinAssembler;

impl JoinAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, pairs: Vec<NearestPair>) -> Result<Vec<JoinedRecord>> {
        pairs
            .into_iter()
            .map(|pair| {
                JoinedRecord::builder()
                    .observation(pair.observation)
                    .station_summary(pair.station)
                    .distance_km(pair.distance_km)
                    .build()
            })
            .collect()
    }
}

impl Default for JoinAssembler {
    fn default() -> Self {
        Self::new()
    }
}
